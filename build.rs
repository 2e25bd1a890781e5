use anyhow::{anyhow, Context};
use aya_build::cargo_metadata;
use std::{env, fs, path::Path};

const PROGRAMS: [&str; 2] = ["ebpfw_tc", "ebpfw_xdp"];

fn main() -> anyhow::Result<()> {
    println!("cargo:rerun-if-env-changed=EBPFW_SKIP_EBPF");

    // Skip eBPF build if we're already building for the eBPF target
    if env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default() == "bpf" {
        return Ok(());
    }

    let out_dir = env::var("OUT_DIR")?;

    if env::consts::OS != "linux" {
        println!(
            "cargo:warning=eBPF compilation skipped on {}; the firewall only runs on Linux.",
            env::consts::OS
        );
        return write_placeholders(&out_dir);
    }

    if env::var("CI").is_ok() || env::var("EBPFW_SKIP_EBPF").is_ok() || !has_bpf_linker() {
        println!("cargo:warning=eBPF compilation skipped; `ebpfw run` will fail to load.");
        return write_placeholders(&out_dir);
    }

    let cargo_metadata::Metadata { packages, .. } = cargo_metadata::MetadataCommand::new()
        .no_deps()
        .exec()
        .context("MetadataCommand::exec")?;

    let ebpf_package = packages
        .into_iter()
        .find(|pkg| pkg.name == "ebpfw-probes")
        .ok_or_else(|| anyhow!("ebpfw-probes package not found"))?;

    aya_build::build_ebpf([ebpf_package])?;

    for program in PROGRAMS {
        let path = Path::new(&out_dir).join(program);
        if !path.exists() {
            return Err(anyhow!(
                "eBPF program compilation failed: {} not found",
                path.display()
            ));
        }
    }

    Ok(())
}

/// Empty objects so `include_bytes_aligned!` resolves; loading them fails
/// at runtime with a parse error.
fn write_placeholders(out_dir: &str) -> anyhow::Result<()> {
    for program in PROGRAMS {
        let path = Path::new(out_dir).join(program);
        if !path.exists() {
            fs::write(&path, []).with_context(|| format!("writing {}", path.display()))?;
        }
    }
    Ok(())
}

fn has_bpf_linker() -> bool {
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join("bpf-linker").is_file()))
        .unwrap_or(false)
}
