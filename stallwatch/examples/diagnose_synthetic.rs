//! Synthetic diagnosis - a connection pool that stopped handing out connections
//!
//! Builds three dumps of an imaginary service by hand: two request threads
//! stuck on the pool monitor, a pool thread that holds it while waiting on a
//! lock held by a reaper, and one busy worker. Prints what stallwatch finds.
//!
//! Run with: RUST_LOG=debug cargo run --example diagnose_synthetic

use anyhow::Result;
use stallwatch::domain::{
    DumpSnapshot, LockObservation, StackFrame, ThreadId, ThreadSnapshot, ThreadState, Timestamp,
};
use stallwatch::stack_filter::FilteredFrame;
use stallwatch::{DiagnosticsConfig, DiagnosticsEngine, DumpSequence, Finding};

fn request_thread(id: u64, cpu: f64) -> ThreadSnapshot {
    ThreadSnapshot::new(ThreadId(id), format!("http-nio-8080-exec-{id}"), ThreadState::Waiting)
        .with_cpu_time(cpu)
        .with_stack(vec![
            StackFrame::new("java.lang.Object", "wait0").native(),
            StackFrame::new("java.lang.Object", "wait").with_location("Object.java", 366),
            StackFrame::new("com.example.pool.ConnectionPool", "borrow").with_location("ConnectionPool.java", 88),
            StackFrame::new("jdk.internal.reflect.DirectMethodHandleAccessor", "invoke"),
            StackFrame::new("java.lang.reflect.Method", "invoke"),
            StackFrame::new("com.example.api.OrderController", "list").with_location("OrderController.java", 31),
            StackFrame::new("org.apache.catalina.core.ApplicationFilterChain", "doFilter"),
            StackFrame::new("java.lang.Thread", "run"),
        ])
        .with_lock(LockObservation::waiting_on("0x00000007c0a1b2c8", "com.example.pool.ConnectionPool"))
}

fn pool_thread(cpu: f64) -> ThreadSnapshot {
    ThreadSnapshot::new(ThreadId(20), "pool-housekeeper", ThreadState::Blocked)
        .with_cpu_time(cpu)
        .with_frame(StackFrame::new("com.example.pool.ConnectionPool", "evict").with_location("ConnectionPool.java", 140))
        .with_lock(LockObservation::locked("0x00000007c0a1b2c8", "com.example.pool.ConnectionPool"))
        .with_lock(LockObservation::waiting_to_lock("0x00000007c0ffee00", "com.example.pool.Reaper"))
}

fn reaper_thread(cpu: f64) -> ThreadSnapshot {
    ThreadSnapshot::new(ThreadId(21), "pool-reaper", ThreadState::Runnable)
        .with_cpu_time(cpu)
        .with_stack(vec![
            StackFrame::new("java.net.SocketInputStream", "socketRead0").native(),
            StackFrame::new("com.example.pool.Reaper", "ping").with_location("Reaper.java", 57),
        ])
        .with_lock(LockObservation::locked("0x00000007c0ffee00", "com.example.pool.Reaper"))
}

fn worker_thread(cpu: f64) -> ThreadSnapshot {
    ThreadSnapshot::new(ThreadId(30), "report-builder", ThreadState::Runnable)
        .with_cpu_time(cpu)
        .with_frame(StackFrame::new("com.example.report.Pdf", "render").with_location("Pdf.java", 210))
}

fn dump(at_millis: u64, worker_cpu: f64) -> DumpSnapshot {
    DumpSnapshot::new(
        Timestamp::from_millis(at_millis),
        vec![
            request_thread(1, 0.12),
            request_thread(2, 0.09),
            pool_thread(3.4),
            reaper_thread(0.8),
            worker_thread(worker_cpu),
        ],
    )
}

fn main() -> Result<()> {
    env_logger::init();

    let dumps = DumpSequence::new(vec![dump(0, 10.0), dump(5_000, 14.5), dump(10_000, 19.2)])?;
    let config = DiagnosticsConfig {
        intelligent_filter: true,
        ..Default::default()
    };
    let engine = DiagnosticsEngine::new(config)?;
    let report = engine.run(&dumps)?;

    println!("🔍 {} dumps over {:.1}s\n", report.dump_count(), dumps.elapsed_secs());

    println!("Busiest threads:");
    for record in report.most_active() {
        println!(
            "   {:<24} cpu +{:.2}s  {}",
            record.name(),
            record.cpu_delta_secs(),
            record.top_frame().map(ToString::to_string).unwrap_or_default()
        );
    }

    println!("\nWhat threads are doing (latest dump):");
    for share in report.category_overview() {
        println!("   {:<16} {} ({:.0}%)", share.value.display_name(), share.count, share.percentage);
    }

    println!("\nFindings:");
    for finding in report.findings() {
        let severity = finding.severity();
        match finding {
            Finding::DependencyCycle(chain) | Finding::DependencyChain(chain) => {
                let path: Vec<_> = chain.threads.iter().map(ToString::to_string).collect();
                println!("   [{severity:?}] wait chain {}", path.join(" → "));
            }
            Finding::LockContention(group) => println!(
                "   [{severity:?}] {} threads blocked on <{}> held by {}",
                group.waiters.len(),
                group.lock_id,
                group.owner
            ),
            Finding::StalledLockGroup(group) => println!(
                "   [{severity:?}] {} stalled threads share <{}>",
                group.threads.len(),
                group.lock_id
            ),
            Finding::StalledThread(thread) => {
                println!("   [{severity:?}] {} stalled on <{}>", thread.name, thread.lock_id);
                for entry in engine.stack_view(thread.stack) {
                    match entry {
                        FilteredFrame::Frame(frame) => println!("         at {frame}"),
                        FilteredFrame::Collapsed(n) => {
                            println!("         ... {n} internal frames");
                        }
                        FilteredFrame::More(n) => println!("         ... {n} more"),
                    }
                }
            }
        }
    }

    for skipped in &report.skipped {
        println!("\n⚠️  {} skipped: needs {:?} dumps", skipped.analysis, skipped.requirement);
    }

    Ok(())
}
