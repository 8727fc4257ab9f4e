//! Compresses the kernel header and templates under `templates/` into
//! `OUT_DIR` and generates the table `paths` extracts them from.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

fn collect(dir: &Path, files: &mut Vec<PathBuf>) {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .expect("read templates directory")
        .map(|e| e.expect("read templates entry").path())
        .collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect(&path, files);
        } else {
            files.push(path);
        }
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let root = manifest_dir.join("templates");
    println!("cargo:rerun-if-changed=templates");

    let mut files = Vec::new();
    collect(&root, &mut files);

    let blob_dir = out_dir.join("bundled");
    fs::create_dir_all(&blob_dir).expect("create bundled dir");

    let mut table = String::from("&[\n");
    for (i, path) in files.iter().enumerate() {
        let contents = fs::read(path).expect("read template");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&contents).expect("compress template");
        let compressed = encoder.finish().expect("finish gzip stream");

        let blob = blob_dir.join(format!("{}.gz", i));
        fs::write(&blob, compressed).expect("write compressed template");

        let name = path
            .strip_prefix(&root)
            .expect("template under templates/")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        writeln!(
            table,
            "    BundledSource {{ name: {:?}, data: include_bytes!({:?}), size: {} }},",
            name,
            blob.display().to_string(),
            contents.len()
        )
        .expect("format table");
        println!("cargo:rerun-if-changed={}", path.display());
    }
    table.push_str("]\n");

    fs::write(out_dir.join("bundled_sources.rs"), table).expect("write bundled_sources.rs");
}
