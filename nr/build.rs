use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let table = sysnum::generate_riscv64_table().expect("generate riscv64 syscall table");
    fs::write(out_dir.join("nr_table.rs"), table).expect("write nr_table.rs");
}
