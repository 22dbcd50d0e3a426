//! End-of-run summary printing

use fuzzforge_engine::FuzzingSummary;

/// Print the run summary to stdout.
pub(crate) fn print_summary(summary: &FuzzingSummary) {
    println!("\nFuzzing complete");
    println!("  Generations explored:  {}", summary.generations);
    println!("  Sequences rendered:    {}", summary.total_sequences);
    if summary.stopped_on_time_budget {
        println!("  Stopped on: time budget");
    }

    let mut origins: Vec<_> = summary.requests_sent.iter().collect();
    origins.sort();
    println!("\nRequests sent:");
    for (origin, count) in origins {
        println!("  {origin}: {count}");
    }

    if summary.bug_buckets.is_empty() {
        println!("\nNo bugs found");
    } else {
        println!("\nBug buckets:");
        for (class, count) in &summary.bug_buckets {
            println!("  {class}: {count}");
        }
    }
}
