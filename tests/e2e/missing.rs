//! Tests for behavior around missing files.

use super::*;

#[test]
fn missing_input() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "external cp {in} {out}\n  in = in.txt\n  out = out.txt\n",
    )?;

    let out = space.run(&mut psibuild_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "missing input in.txt");

    Ok(())
}

#[test]
fn missing_generated() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "
external echo mid
  out = mid.txt

external touch {out}
  in = mid.txt
  out = out.txt
",
    )?;

    // The first command succeeds but never writes its output.
    let out = space.run(&mut psibuild_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "missing output mid.txt");
    assert!(!space.exists("out.txt"));

    Ok(())
}

#[test]
fn deleted_output_is_rebuilt() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.psi", "external echo hi > {out}\n  out = hi.txt\n")?;
    space.run_expect(&mut psibuild_command(vec![]))?;

    std::fs::remove_file(space.path().join("hi.txt"))?;
    let out = space.run_expect(&mut psibuild_command(vec![]))?;
    assert_output_contains(&out, "ran 1 tasks");
    assert!(space.exists("hi.txt"));

    Ok(())
}

#[test]
fn creates_output_directories() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.psi",
        "external echo deep > {out}\n  out = sub/dir/deep.txt\n",
    )?;
    space.run_expect(&mut psibuild_command(vec![]))?;
    assert_eq!(space.read("sub/dir/deep.txt")?, "deep\n");

    Ok(())
}
