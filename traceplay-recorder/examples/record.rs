//! Records a small multi-threaded trace to a file that `traceplay`
//! can replay.
//!
//! ```
//! $ cargo run --example record
//! $ traceplay demo-<date>.trace
//! ```
use std::thread;
use std::time::Duration;

use chrono::Local;

fn busy(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

fn main() {
    let date = Local::now().format("%Y-%m-%dT%H:%M:%S");
    let path = format!("demo-{}.trace", date);
    let output = traceplay_recorder::file_output(&path).expect("failed to create trace file");
    traceplay_recorder::set_flush_callback(output).expect("output already installed");

    let workers: Vec<_> = (0..3)
        .map(|i| {
            thread::spawn(move || {
                traceplay_recorder::name_thread(&format!("worker-{}", i));
                for round in 0..5 {
                    traceplay_recorder::zone_start(
                        line!(),
                        file!(),
                        "busy",
                        &format!("round-{}", round),
                        0,
                    );
                    busy(10 + i * 3);
                    traceplay_recorder::zone_end();
                }
                traceplay_recorder::message(&format!("worker {} done", i), 0x00_40_a0_40);
                traceplay_recorder::flush();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    println!("recorded {}", path);
}
