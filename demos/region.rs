use std::io::Read;

use shmarena::{Arena, ArenaConfig, Offset, logging};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the segment with tools like `ipcs -m`,
/// `pmap`, or `gdb` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the arena counters.
fn print_usage(
  label: &str,
  arena: &Arena,
) {
  println!(
    "[{}] PID = {}, used = {} bytes, free = {} bytes, total = {} bytes",
    label,
    std::process::id(),
    arena.used_size(),
    arena.free_size(),
    arena.total_size(),
  );
}

fn print_alloc(
  size: u64,
  offset: Offset,
  arena: &Arena,
) {
  println!(
    "Allocated {} bytes, offset = {:#x}, usable = {} bytes",
    size,
    offset.get(),
    arena.payload_size(offset).unwrap_or(0)
  );
}

fn main() {
  logging::init_logger();

  // A locked, OOM-tolerant arena over an anonymous shared mapping. Forked
  // children see the same region and contend on the same mutex.
  let config = ArenaConfig::new(64 * 1024, "demo cache", "DemoCacheSize")
    .with_lock(true)
    .with_allow_oom(true);
  let arena = Arena::create(&config);

  print_usage("start", &arena);
  arena.dump_stats();
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate a small payload and write into it.
  // --------------------------------------------------------------------
  let first = arena.allocate(4).unwrap();
  println!("\n[1] Allocate 4 bytes (rounded up to the 24 byte minimum)");
  print_alloc(4, first, &arena);

  arena.write(first, &0xDEADBEEFu32.to_le_bytes()).unwrap();
  let mut buf = [0u8; 4];
  arena.read(first, &mut buf).unwrap();
  println!("[1] Value read back = 0x{:X}", u32::from_le_bytes(buf));

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate two neighbours, then release them to watch coalescing.
  // --------------------------------------------------------------------
  let second = arena.allocate(50).unwrap();
  let third = arena.allocate(50).unwrap();
  let pin = arena.allocate(50).unwrap();
  println!("\n[2] Allocate three 50 byte payloads");
  print_alloc(50, second, &arena);
  print_alloc(50, third, &arena);
  print_alloc(50, pin, &arena);

  arena.release(second);
  arena.release(third);
  println!("[2] Released the first two, they merge into one free chunk");
  arena.dump_stats();

  let merged = arena.allocate(128).unwrap();
  println!(
    "[2] 128 byte request landed at {:#x}, where the first of them was: {}",
    merged.get(),
    merged == second
  );

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Resize: a marginal shrink keeps the chunk, growth may move it.
  // --------------------------------------------------------------------
  let kept = arena.resize(Some(merged), 100).unwrap();
  println!("\n[3] Shrink 128 -> 100 keeps the offset: {}", kept == merged);

  let grown = arena.resize(Some(kept), 2000).unwrap();
  println!("[3] Grow 128 -> 2000 moved to {:#x}", grown.get());
  print_usage("after resize", &arena);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Fork: the child allocates in the shared region, the parent sees it.
  // --------------------------------------------------------------------
  println!("\n[4] Forking a child that allocates 1000 bytes");
  match unsafe { libc::fork() } {
    -1 => eprintln!("[4] fork failed: {}", std::io::Error::last_os_error()),
    0 => {
      let child = arena.allocate(1000).unwrap();
      print_alloc(1000, child, &arena);
      print_usage("child", &arena);
      std::process::exit(0);
    }
    pid => {
      let mut status = 0;
      unsafe { libc::waitpid(pid, &mut status, 0) };
      print_usage("parent", &arena);
    }
  }

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Exhaust the tolerant arena, then recover by clearing it.
  //    Offsets handed out before the clear are no longer valid after it.
  // --------------------------------------------------------------------
  arena.release(first);

  let mut count = 0;
  while arena.allocate(4096).is_some() {
    count += 1;
  }
  println!("\n[5] Fit {} more 4 KiB payloads before running out", count);
  print_usage("exhausted", &arena);

  arena.clear();
  print_usage("cleared", &arena);

  // --------------------------------------------------------------------
  // 6) End of demo. The mutex is destroyed and the mapping released.
  // --------------------------------------------------------------------
  arena.destroy();
  println!("\n[6] End of example.");
}
