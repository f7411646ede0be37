//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the hub MUST NOT use blocking I/O.
//! **Required**: `tokio::net` for sockets everywhere; `tokio::fs` inside async
//! functions. Synchronous startup code (config loading) may read files with
//! `std::fs`.

use architectural_enforcement::{code_part, enclosing_fn_is_async, production_sources};

const BLOCKING_SOCKETS: &[&str] = &[
    "std::net::TcpStream",
    "std::net::TcpListener",
    "std::net::UdpSocket",
];

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);

            if BLOCKING_SOCKETS.iter().any(|s| code.contains(s)) {
                violations.push(file.violation(idx, "Blocking socket"));
            }

            if code.contains("std::fs::")
                && enclosing_fn_is_async(&file.lines, idx) == Some(true)
            {
                violations.push(file.violation(idx, "Blocking file I/O in async fn"));
            }

            if code.contains("std::thread::spawn") || code.contains("block_on(") {
                violations.push(file.violation(idx, "Thread or runtime blocking"));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::net::TcpListener / TcpStream");
        eprintln!("  - tokio::fs inside async functions");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}
