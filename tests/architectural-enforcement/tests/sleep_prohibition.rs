//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the hub MUST NOT call sleep methods.
//! Periodic work uses `tokio::time::interval`; waiting uses cancellation
//! tokens, channels or I/O readiness. Test modules are exempt.

use architectural_enforcement::{code_part, production_sources};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);
            if code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
            {
                violations.push(file.violation(idx, "Sleep call"));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use instead:");
        eprintln!("  - tokio::time::interval() for periodic work");
        eprintln!("  - CancellationToken::cancelled() to wait for shutdown");
        eprintln!("  - channels or I/O readiness to wait for events");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}
