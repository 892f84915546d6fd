//! End-to-end pipeline test for syspatch
//!
//! Runs the full plan -> generate -> write sequence against a synthetic
//! library text buffer viewed at a virtual base address near the real
//! trampoline arena, and checks that every byte the engine writes lands
//! where the plans said it would.
//!
//! The protection-transition half of activation needs a genuinely mapped
//! library, so these tests drive the write pass directly through a
//! `CodeView`; the byte layout is identical.

use syspatch::activator::write_patches;
use syspatch::arch;
use syspatch::{
	CodeView, DispatchTemplate, InstructionInfo, LibraryDescriptor, PaddingRegion, PatchEngine, PatchPlan, TemplateSet,
};

const TEXT_LEN: usize = 0x1000;
const TMPL_LEN: usize = 48;
const PLAN_SLOT: usize = 8;
const DISPATCH_SLOT: usize = 32;
const HOOK_ENTRY: usize = 0x5555_0000;

fn engine() -> PatchEngine {
	let templates = TemplateSet {
		base: DispatchTemplate::new(vec![0x90; TMPL_LEN], PLAN_SLOT, DISPATCH_SLOT).unwrap(),
		vector_save: None,
	};
	PatchEngine::new(templates, HOOK_ENTRY).unwrap()
}

fn decode_near_jump(buf: &[u8], offset: usize, base: usize) -> usize {
	assert_eq!(buf[offset], 0xE9, "expected jmp rel32 at offset {offset:#x}");
	let d = i32::from_le_bytes(buf[offset + 1..offset + 5].try_into().unwrap());
	(base + offset + arch::JUMP_INS_SIZE).wrapping_add_signed(d as isize)
}

fn decode_short_jump(buf: &[u8], offset: usize, base: usize) -> usize {
	assert_eq!(buf[offset], 0xEB, "expected jmp rel8 at offset {offset:#x}");
	let d = buf[offset + 1] as i8;
	(base + offset + arch::SHORT_JUMP_INS_SIZE).wrapping_add_signed(d as isize)
}

#[test]
fn full_pipeline_over_synthetic_text() {
	let mut engine = engine();

	// Keep the fake text within rel32 range of the arena so wrappers are
	// directly reachable and no trampoline table is needed.
	let text_base = engine.arena().next_addr() + 0x10_0000;
	let mut lib = LibraryDescriptor::new("libfake.so", text_base, text_base + TEXT_LEN);

	let mut buf = vec![0u8; TEXT_LEN];
	for (i, b) in buf.iter_mut().enumerate() {
		*b = (i % 251) as u8;
	}
	let pristine = buf.clone();

	// Site 1: an in-range padding region 40 bytes ahead
	let site1 = text_base + 0x100;
	lib.push_plan(PatchPlan::new(
		site1,
		0x100,
		InstructionInfo::plain(3),
		InstructionInfo::plain(2),
		InstructionInfo::plain(4),
	));
	lib.set_padding_regions(vec![PaddingRegion { address: site1 + 40, size: 7 }]);

	// Site 2: no padding left, both preceding instructions and the
	// following instruction relocatable
	let site2 = text_base + 0x400;
	lib.push_plan(PatchPlan::new(
		site2,
		0x400,
		InstructionInfo::plain(3),
		InstructionInfo::plain(2),
		InstructionInfo::plain(4),
	));

	// Site 3: only the following instruction relocatable
	let site3 = text_base + 0x700;
	let call = InstructionInfo {
		is_call: true,
		..InstructionInfo::plain(5)
	};
	lib.push_plan(PatchPlan::new(site3, 0x700, call, InstructionInfo::plain(2), InstructionInfo::plain(4)));

	engine.plan_library(&mut lib).unwrap();

	assert!(lib.plans[0].padding.is_some());
	assert_eq!(lib.plans[0].return_addr, site1 + 2);

	assert!(lib.plans[1].uses_prev && lib.plans[1].uses_prev_2 && lib.plans[1].uses_next);
	assert_eq!(lib.plans[1].jump_patch_addr, site2 - 5);
	assert_eq!(lib.plans[1].return_addr, site2 + 6);

	assert!(!lib.plans[2].uses_prev && lib.plans[2].uses_next);
	assert_eq!(lib.plans[2].jump_patch_addr, site3);
	assert_eq!(lib.plans[2].return_addr, site3 + 6);

	// Every escape jump lands inside the text segment
	for plan in &lib.plans {
		assert!(plan.jump_patch_addr >= text_base && plan.jump_patch_addr < text_base + TEXT_LEN);
	}

	let cursor_before = engine.arena().cursor();
	{
		let text = CodeView::new(text_base, &mut buf);
		engine.generate_wrappers(&mut lib, &text).unwrap();
	}

	// Arena accounting: wrappers are laid out back to back
	let expected: usize = [
		TMPL_LEN + arch::JUMP_INS_SIZE,         // site 1: no relocations
		5 + TMPL_LEN + 4 + arch::JUMP_INS_SIZE, // site 2: prev(3) + prev2(2) + next(4)
		TMPL_LEN + 4 + arch::JUMP_INS_SIZE,     // site 3: next(4)
	]
	.iter()
	.sum();
	assert_eq!(engine.arena().cursor(), cursor_before + expected);

	let w1 = lib.plans[0].wrapper_addr.unwrap();
	let w2 = lib.plans[1].wrapper_addr.unwrap();
	let w3 = lib.plans[2].wrapper_addr.unwrap();
	assert!(w1 < w2 && w2 < w3, "wrapper ranges must not overlap");

	// Site 2's wrapper starts with the five relocated preceding bytes
	let w2_code = unsafe { std::slice::from_raw_parts(w2 as *const u8, 5 + TMPL_LEN) };
	assert_eq!(&w2_code[..5], &pristine[0x400 - 5..0x400]);
	let plan_ptr = u64::from_le_bytes(w2_code[5 + PLAN_SLOT..5 + PLAN_SLOT + 8].try_into().unwrap());
	assert_eq!(plan_ptr, std::ptr::addr_of!(lib.plans[1]) as u64);
	let hook = u64::from_le_bytes(w2_code[5 + DISPATCH_SLOT..5 + DISPATCH_SLOT + 8].try_into().unwrap());
	assert_eq!(hook, HOOK_ENTRY as u64);

	{
		let mut text = CodeView::new(text_base, &mut buf);
		write_patches(&mut lib, &mut text).unwrap();
	}

	// Site 1: short jump at the syscall into the padding escape point,
	// short jump over the escape, escape jump to wrapper 1
	let region = lib.plans[0].padding.unwrap();
	assert_eq!(decode_short_jump(&buf, 0x100, text_base), region.address + 2);
	assert_eq!(decode_short_jump(&buf, region.address - text_base, text_base), region.end());
	assert_eq!(decode_near_jump(&buf, region.address + 2 - text_base, text_base), w1);
	// No trap fill for padding sites
	assert_eq!(buf[0x102], pristine[0x102]);

	// Site 2: escape jump at site - 5, then 5 + 2 + 4 - 5 = 6 trap bytes
	assert_eq!(decode_near_jump(&buf, 0x400 - 5, text_base), w2);
	for off in 0x400..0x406 {
		assert_eq!(buf[off], arch::TRAP_OPCODE, "trap fill missing at {off:#x}");
	}
	assert_eq!(buf[0x406], pristine[0x406]);

	// Site 3: escape jump at the syscall itself, one trap byte
	assert_eq!(decode_near_jump(&buf, 0x700, text_base), w3);
	assert_eq!(buf[0x705], arch::TRAP_OPCODE);
	assert_eq!(buf[0x706], pristine[0x706]);

	// Wrapper tails resume at each plan's return address
	for plan in &lib.plans {
		let wrapper = plan.wrapper_addr.unwrap();
		let prefix = plan.relocated_prefix_len();
		let suffix = if plan.uses_next { plan.following.length as usize } else { 0 };
		let tail_off = prefix + TMPL_LEN + suffix;
		let code = unsafe { std::slice::from_raw_parts(wrapper as *const u8, tail_off + arch::JUMP_INS_SIZE) };
		assert_eq!(decode_near_jump(code, tail_off, wrapper), plan.return_addr);
	}

	// Sealing the arena is a one-time transition; repeats are no-ops
	engine.seal().unwrap();
	engine.seal().unwrap();
	assert!(engine.arena().is_sealed());
}

#[test]
fn far_library_routes_through_trampoline_table() {
	let mut engine = engine();

	// A text base far beyond rel32 range of the arena
	let text_base = engine.arena().next_addr() + 0x3_0000_0000;
	let mut lib = LibraryDescriptor::new("libfar.so", text_base, text_base + TEXT_LEN);

	// Table memory "reserved near the library" by the analysis pass
	let table_base = text_base + TEXT_LEN + 0x200;
	let table_buf = Box::leak(vec![0u8; 4 * arch::INDIRECT_JUMP_SIZE].into_boxed_slice());
	let table_ptr = table_buf.as_ptr();
	lib.attach_trampoline_table(syspatch::TrampolineTable::new(CodeView::new(table_base, table_buf)));

	let site = text_base + 0x100;
	lib.push_plan(PatchPlan::new(
		site,
		0x100,
		InstructionInfo::plain(3),
		InstructionInfo::plain(2),
		InstructionInfo::plain(4),
	));

	engine.plan_library(&mut lib).unwrap();

	let mut buf = vec![0u8; TEXT_LEN];
	{
		let text = CodeView::new(text_base, &mut buf);
		engine.generate_wrappers(&mut lib, &text).unwrap();
	}
	let wrapper = lib.plans[0].wrapper_addr.unwrap();

	{
		let mut text = CodeView::new(text_base, &mut buf);
		write_patches(&mut lib, &mut text).unwrap();
	}

	// The escape jump targets the first table entry, not the wrapper
	let jump_off = lib.plans[0].jump_patch_addr - text_base;
	assert_eq!(decode_near_jump(&buf, jump_off, text_base), table_base);

	// The entry holds an indirect far jump whose pointer is the wrapper
	drop(lib);
	let entry = unsafe { std::slice::from_raw_parts(table_ptr, arch::INDIRECT_JUMP_SIZE) };
	assert_eq!(&entry[..2], &[0xFF, 0x25]);
	assert_eq!(u64::from_le_bytes(entry[6..14].try_into().unwrap()), wrapper as u64);
}
