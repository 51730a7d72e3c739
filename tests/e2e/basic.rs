use crate::e2e::*;

#[test]
fn empty_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", "")?;
    let out = space.run(&mut psibuild_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "psibuild: no work to do\n");
    Ok(())
}

#[test]
fn pipeline_then_up_to_date() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", PIPELINE)?;
    space.write("clean.sh", CLEAN_SH)?;
    space.write("raw.txt", "pear\n# header\napple\n")?;

    let out = space.run_expect(&mut psibuild_command(vec![]))?;
    assert_output_contains(&out, "cleaning");
    assert_output_contains(&out, "psibuild: ran 2 tasks, now up to date");
    assert_eq!(space.read("sorted.txt")?, "apple\npear\n");
    assert!(space.exists(".psibuild_state"));

    let out = space.run_expect(&mut psibuild_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "psibuild: no work to do\n");
    Ok(())
}

#[test]
fn editing_script_reruns_downstream() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", PIPELINE)?;
    space.write("clean.sh", CLEAN_SH)?;
    space.write("raw.txt", "pear\napple\n")?;
    space.run_expect(&mut psibuild_command(vec![]))?;

    space.write("clean.sh", "tr a-z A-Z < \"$1\" > raw-clean.txt\n")?;
    space.touch("clean.sh")?;
    let out = space.run_expect(&mut psibuild_command(vec![]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert_eq!(space.read("sorted.txt")?, "APPLE\nPEAR\n");
    Ok(())
}

#[test]
fn requested_target_runs_only_its_closure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", PIPELINE)?;
    space.write("clean.sh", CLEAN_SH)?;
    space.write("raw.txt", "b\na\n")?;

    let out = space.run_expect(&mut psibuild_command(vec!["raw-clean.txt"]))?;
    assert_output_contains(&out, "ran 1 tasks");
    assert!(space.exists("raw-clean.txt"));
    assert!(!space.exists("sorted.txt"));
    Ok(())
}

#[test]
fn default_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "
external echo one > {out}
  out = one.txt

external echo two > {out}
  out = two.txt

default two.txt
",
    )?;
    space.run_expect(&mut psibuild_command(vec![]))?;
    assert!(!space.exists("one.txt"));
    assert_eq!(space.read("two.txt")?, "two\n");
    Ok(())
}

#[test]
fn builddir_holds_state() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "builddir = .cache

external echo hi > {out}
  out = hi.txt
",
    )?;
    space.run_expect(&mut psibuild_command(vec![]))?;
    assert!(space.exists(".cache/.psibuild_state"));
    assert!(!space.exists(".psibuild_state"));
    Ok(())
}

#[test]
fn dry_run_prints_plan() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", PIPELINE)?;
    space.write("clean.sh", CLEAN_SH)?;
    space.write("raw.txt", "b\na\n")?;

    let out = space.run_expect(&mut psibuild_command(vec!["-n"]))?;
    assert_output_contains(&out, "dirty raw-clean.txt: output raw-clean.txt missing");
    assert_output_contains(&out, "dirty sorted.txt: ");
    assert!(!space.exists("raw-clean.txt"));
    assert!(!space.exists(".psibuild_state"));

    space.run_expect(&mut psibuild_command(vec![]))?;
    let out = space.run_expect(&mut psibuild_command(vec!["-n"]))?;
    assert_output_contains(&out, "clean raw-clean.txt");
    assert_output_contains(&out, "clean sorted.txt");
    Ok(())
}

#[test]
fn force_reruns_everything() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", PIPELINE)?;
    space.write("clean.sh", CLEAN_SH)?;
    space.write("raw.txt", "b\na\n")?;
    space.run_expect(&mut psibuild_command(vec![]))?;

    let out = space.run_expect(&mut psibuild_command(vec!["-B"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    Ok(())
}

#[test]
fn explain() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", "external echo hi > {out}\n  out = hi.txt\n")?;
    let out = space.run_expect(&mut psibuild_command(vec!["-d", "explain"]))?;
    assert_output_contains(&out, "explain: hi.txt: output hi.txt missing");
    Ok(())
}

#[test]
fn verbose_prints_command_lines() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "external echo hi > {out}\n  out = hi.txt\n  description = greeting\n",
    )?;
    let out = space.run_expect(&mut psibuild_command(vec!["-v"]))?;
    assert_output_contains(&out, "echo hi > hi.txt");
    Ok(())
}

#[test]
fn tools() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", PIPELINE)?;

    let out = space.run_expect(&mut psibuild_command(vec!["-t", "kinds"]))?;
    assert_output_contains(&out, "script");
    assert_output_contains(&out, "external");

    let out = space.run_expect(&mut psibuild_command(vec!["-t", "targets"]))?;
    assert_output_contains(&out, "raw-clean.txt: raw-clean.txt");
    assert_output_contains(&out, "sorted.txt: sorted.txt");
    Ok(())
}

#[test]
fn chdir() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("sub/build.psi", "external echo hi > {out}\n  out = hi.txt\n")?;
    space.run_expect(&mut psibuild_command(vec!["-C", "sub"]))?;
    assert_eq!(space.read("sub/hi.txt")?, "hi\n");
    Ok(())
}

#[test]
fn stdout_capture() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "external tr a-z A-Z < {in}
  in = lines.txt
  stdout = upper.txt
",
    )?;
    space.write("lines.txt", "a\nb\n")?;
    space.run_expect(&mut psibuild_command(vec![]))?;
    assert_eq!(space.read("upper.txt")?, "A\nB\n");
    Ok(())
}

#[test]
fn removed_commands_are_forgotten() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let greeting = "external echo hi > {out}\n  out = hi.txt\n";
    space.write("build.psi", greeting)?;
    space.run_expect(&mut psibuild_command(vec![]))?;

    // hi.txt stays on disk, but nothing produces it for one run.
    space.write("build.psi", "external echo bye > {out}\n  out = bye.txt\n")?;
    space.run_expect(&mut psibuild_command(vec![]))?;

    space.write("build.psi", greeting)?;
    let out = space.run_expect(&mut psibuild_command(vec!["-n"]))?;
    assert_output_contains(&out, "dirty hi.txt: no previous record of hi.txt");
    Ok(())
}
