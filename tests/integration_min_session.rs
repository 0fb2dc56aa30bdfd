// Minimal integration test that drives the compiled binary through a PTY.
// This exercises the real event loop and crossterm input handling across
// the main boundaries without relying on internal modules.
//
// Notes:
// - Requires a TTY; uses expectrl which allocates a pseudo terminal.
// - Marked Unix-only and ignored by default to avoid CI/platform issues.
// - Run manually via: `cargo test --test integration_min_session -- --ignored`.

#![cfg(unix)]

use std::time::Duration;

use expectrl::{spawn, Eof};

#[test]
#[ignore]
fn minimal_trial_completes_and_exits() -> Result<(), Box<dyn std::error::Error>> {
    // Resolve path to compiled binary (debug build during tests)
    let bin = assert_cmd::cargo::cargo_bin("saccade");
    let cmd = format!(
        "{} --seed 1 --no-face-check -c 0.3 -v 0.3 --no-shuffle",
        bin.display()
    );

    // Spawn the TUI inside a pseudo terminal
    let mut p = spawn(cmd)?;

    // Give the app a moment to initialize the terminal/alternate screen
    std::thread::sleep(Duration::from_millis(300));

    // Space past the calibration and validation notices
    p.send(" ")?;
    std::thread::sleep(Duration::from_millis(1500));
    p.send(" ")?;

    // Allow both short phases to run to the results screen
    std::thread::sleep(Duration::from_millis(8000));

    // Send ESC to exit from the app (handled in both trial and results states)
    p.send("\x1b")?; // ESC

    // Wait for the program to terminate cleanly
    p.expect(Eof)?;
    Ok(())
}
