use std::ptr;

use libc::sbrk;
use tagalloc::{FitPolicy, Heap, HeapConfig, SbrkStore};

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_alloc(
  heap: &Heap<SbrkStore>,
  size: usize,
  addr: *mut u8,
) {
  println!(
    "Allocated {} bytes, address = {:?}, usable = {:?}, program break = {:?}",
    size,
    addr,
    heap.usable_size(addr),
    unsafe { sbrk(0) }
  );
}

fn main() {
  let config = HeapConfig::default()
    .with_fit(FitPolicy::BestFit)
    .with_chunk_size(4096);

  unsafe {
    print_program_break("start");

    let store = match SbrkStore::new() {
      Ok(store) => store,
      Err(err) => {
        eprintln!("cannot claim the program break: {err}");
        return;
      }
    };
    let mut heap = match Heap::new(store, config) {
      Ok(heap) => heap,
      Err(err) => {
        eprintln!("cannot create heap: {err}");
        return;
      }
    };
    print_program_break("heap created");

    // --------------------------------------------------------------------
    // 1) A few allocations of different sizes.
    // --------------------------------------------------------------------
    let first = heap.allocate(4);
    print_alloc(&heap, 4, first);
    if first.is_null() {
      eprintln!("out of memory");
      return;
    }
    first.cast::<u32>().write(0xDEADBEEF);

    let second = heap.allocate(12);
    print_alloc(&heap, 12, second);
    if second.is_null() {
      eprintln!("out of memory");
      return;
    }
    ptr::write_bytes(second, 0xAB, 12);

    let third = heap.allocate(100);
    print_alloc(&heap, 100, third);

    // --------------------------------------------------------------------
    // 2) Release the first block and allocate something small: the freed
    //    block is reused.
    // --------------------------------------------------------------------
    heap.release(first);
    let fourth = heap.allocate(2);
    print_alloc(&heap, 2, fourth);
    println!("fourth == first? {}", fourth == first);

    // --------------------------------------------------------------------
    // 3) Grow the second block; it keeps its contents wherever it ends up.
    // --------------------------------------------------------------------
    let grown = heap.reallocate(second, 1000);
    print_alloc(&heap, 1000, grown);
    if !grown.is_null() {
      println!("second moved? {}, first byte = {:#x}", grown != second, grown.read());
    }

    // --------------------------------------------------------------------
    // 4) A large allocation moves the program break.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = heap.allocate(64 * 1024);
    print_alloc(&heap, 64 * 1024, big);
    print_program_break("after large alloc");

    for ptr in [third, fourth, grown, big] {
      heap.release(ptr);
    }

    let violations = heap.check_consistency(false);
    println!("heap check: {} violation(s)", violations.len());
    for violation in violations {
      println!("  {violation}");
    }
  }
}
