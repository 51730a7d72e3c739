//! Tests for failing commands, bad build files, and interruption.

use super::*;
use std::time::{Duration, Instant};

#[test]
fn failure_exits_1_and_reports_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "
external echo oops; exit 4
  name = broken
  out = broken.txt
  description = breaking

external cat {in} > {out}
  in = broken.txt
  out = after.txt

external echo fine > {out}
  out = fine.txt
",
    )?;
    let out = space.run(&mut psibuild_command(vec!["-j", "1"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: breaking: exit status 4");
    assert_output_contains(&out, "oops");
    assert_output_contains(&out, "psibuild: command failed: broken");
    assert!(!space.exists("after.txt"));
    // Independent work still happens.
    assert_eq!(space.read("fine.txt")?, "fine\n");
    Ok(())
}

#[test]
fn keep_going_limit() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "
external exit 1
  name = first
  out = a.txt

external exit 1
  name = second
  out = b.txt
",
    )?;
    let out = space.run(&mut psibuild_command(vec!["-j", "1", "-k", "1"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "psibuild: command failed: first");
    assert_output_not_contains(&out, "second");

    let out = space.run(&mut psibuild_command(vec!["-j", "1"]))?;
    assert_output_contains(&out, "psibuild: commands failed: first, second");
    Ok(())
}

#[test]
fn parse_error_exits_2() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", "external echo $!oops\n")?;
    let out = space.run(&mut psibuild_command(vec![]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "psibuild: error: parse error");
    assert_output_contains(&out, "build.psi:1:");
    Ok(())
}

#[test]
fn unknown_kind_exits_2() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", "\n\nnotebook analysis.ipynb\n")?;
    let out = space.run(&mut psibuild_command(vec![]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "build.psi:3: unknown command kind \"notebook\"");
    Ok(())
}

#[test]
fn cycle_exits_2() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "
external cp {in} {out}
  name = a
  in = b.txt
  out = a.txt

external cp {in} {out}
  name = b
  in = a.txt
  out = b.txt
",
    )?;
    let out = space.run(&mut psibuild_command(vec![]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "dependency cycle");
    Ok(())
}

#[test]
fn duplicate_output_exits_2() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "
external echo 1 > {out}
  out = x.txt

external echo 2 > {out}
  out = x.txt
",
    )?;
    let out = space.run(&mut psibuild_command(vec![]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "\"x.txt\" is produced by both");
    Ok(())
}

#[test]
fn duplicate_name_exits_2() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "
external echo 1 > {out}
  name = fit
  out = a.txt

external echo 2 > {out}
  name = fit
  out = b.txt
",
    )?;
    let out = space.run(&mut psibuild_command(vec![]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "command id \"fit\" is used twice");
    Ok(())
}

#[test]
fn unknown_target_exits_2() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", "external echo hi > {out}\n  out = hi.txt\n")?;
    let out = space.run(&mut psibuild_command(vec!["nope.txt"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "unknown target \"nope.txt\"");
    Ok(())
}

#[test]
fn timeout() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "external sleep 30 && touch {out}
  out = slow.txt
  timeout = 0.2
",
    )?;
    let start = Instant::now();
    let out = space.run(&mut psibuild_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "timed out after");
    assert!(start.elapsed() < Duration::from_secs(20));
    Ok(())
}

#[test]
fn corrupt_state_is_a_warning() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", "external echo hi > {out}\n  out = hi.txt\n")?;
    space.write(".psibuild_state", "garbage")?;
    let out = space.run_expect(&mut psibuild_command(vec![]))?;
    assert_output_contains(&out, "psibuild: warning:");
    assert_output_contains(&out, "ran 1 tasks");

    let out = space.run_expect(&mut psibuild_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn interrupt_stops_the_run() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "
external sleep 30 && touch {out}
  out = slow.txt

external touch {out}
  in = slow.txt
  out = after.txt
",
    )?;
    let start = Instant::now();
    let child = psibuild_command(vec!["--grace", "0.2"])
        .current_dir(space.path())
        .stdout(std::process::Stdio::piped())
        .spawn()?;
    // Give it time to start the sleep.
    std::thread::sleep(Duration::from_millis(500));
    // Safety: plain kill(2) on a child we own.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }
    let out = child.wait_with_output()?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "psibuild: interrupted");
    assert!(!space.exists("after.txt"));
    assert!(start.elapsed() < Duration::from_secs(20));
    Ok(())
}
