use std::io::Result;

use cc;

fn main() -> Result<()> {
    cc::Build::new()
        .file("asm/entry.S")
        .file("asm/no_intercept.S")
        .compile("sysgate-asm");
    println!("cargo:rerun-if-changed=asm/entry.S");
    println!("cargo:rerun-if-changed=asm/no_intercept.S");
    Ok(())
}
