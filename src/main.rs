use clap::Parser;
use std::{
    hint, process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

#[cfg(any(target_os = "macos", all(target_os = "linux", target_env = "gnu")))]
use threadtrace::{Backtracer, Config, Immediate, LogicalThread, NativePlatform};

/// Print the call stacks of a few busy threads of this process.
#[derive(Parser)]
#[command(name = "threadtrace")]
struct Args {
    /// Let the system format the calling thread's stack
    #[arg(long)]
    native: bool,

    /// Name frames with the system's raw per-address strings
    #[arg(long)]
    no_demangle: bool,

    /// Print a JSON snapshot of all threads
    #[arg(long, conflicts_with_all = ["thread", "main"])]
    json: bool,

    /// Only trace the thread with this name
    #[arg(long, value_name = "NAME", conflicts_with = "main")]
    thread: Option<String>,

    /// Only trace the main thread
    #[arg(long)]
    main: bool,

    /// Number of spinning worker threads to start
    #[arg(long, default_value = "2")]
    workers: usize,
}

#[cfg(any(target_os = "macos", all(target_os = "linux", target_env = "gnu")))]
fn main() {
    env_logger::init();
    let args = Args::parse();

    let tracer = Backtracer::setup(
        NativePlatform::new(),
        Config::new(args.native, !args.no_demangle),
        &Immediate,
    );

    let stop = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..args.workers)
        .map(|i| {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("animals-{i}"))
                .spawn(move || animals(&stop))
                .unwrap_or_else(|e| {
                    eprintln!("error: failed to spawn worker: {e}");
                    process::exit(1);
                })
        })
        .collect();
    thread::sleep(Duration::from_millis(50));

    let output = if args.json {
        match serde_json::to_string_pretty(&tracer.snapshot_all()) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        }
    } else if let Some(name) = args.thread {
        tracer.capture(&LogicalThread::Named(name))
    } else if args.main {
        tracer.capture_main()
    } else {
        // Captured from a background thread, like a hang watchdog would.
        thread::scope(|s| {
            s.spawn(|| tracer.capture_all())
                .join()
                .unwrap_or_default()
        })
    };
    println!("{output}");

    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        let _ = worker.join();
    }
}

#[cfg(not(any(target_os = "macos", all(target_os = "linux", target_env = "gnu"))))]
fn main() {
    let _ = Args::parse();
    eprintln!("error: no thread introspection support for this platform");
    process::exit(1);
}

#[inline(never)]
fn animals(stop: &AtomicBool) {
    tiger(stop);
}

#[inline(never)]
fn tiger(stop: &AtomicBool) {
    simba(stop);
}

#[inline(never)]
fn simba(stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        hint::spin_loop();
    }
}
