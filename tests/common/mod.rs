#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use simexrs::data::Dataset;
use simexrs::{ProcessRunner, RuntimeConfig, StageKind};

const SOURCE: &str = r#"#!/bin/sh
[ -f fast2xy.inp ] || exit 9
echo "fast2xy in $(pwd)"
printf '# Ehor Ever\n1.0 0.5\n2.0 0.25\n' > field.dat
printf '2 2 1 1.0e-15 -1.0e-15 1.0e-4 -1.0e-4 1.0e-4 -1.0e-4 0.0\n' > mesh.dat
printf '1.0 1.0 0.0 0.0 0.0 0.0\n' > beam.dat
printf '0.0 1.0\n1.0 0.5\n' > angular_distribution.dat
printf '0.0 3.0D-05\n' > spot_size.dat
printf '0.0 1.0e+06\n' > gain_curve.dat
printf '1.0\n' > nzc.dat
printf '0.0 0.0\n1.0e-15 1.0\n' > temporal_struct.dat
[ -f FAST2XY.DAT ] || printf '0.0 1.0\n' > FAST2XY.DAT
exit 0
"#;

const PROPAGATOR: &str = r#"#!/bin/sh
[ -f prop_in.json ] || exit 9
grep -q 'input = prop_in.json' prop.inp || exit 8
printf '1.0 0.5\n2.0 0.25\n' > field.dat
printf '2 2 1 1.0e5 -1.0e5 1.0e5 -1.0e5 1.0e-15 -1.0e-15 1.0e-4 -1.0e-4 1.0e-4 -1.0e-4 200.0\n' > mesh.dat
printf '1.2e-6 1.3e-6\n' > fwhm.dat
printf 'Drift L = 200 m\n' > beamline.txt
exit 0
"#;

const PROPAGATOR_NAN: &str = r#"#!/bin/sh
printf '1.0 0.5\n2.0 0.25\n' > field.dat
printf '2 2 1 1.0e5 -1.0e5 1.0e5 -1.0e5 1.0e-15 -1.0e-15 1.0e-4 -1.0e-4 1.0e-4 -1.0e-4 200.0\n' > mesh.dat
printf 'NaN 1.3e-6\n' > fwhm.dat
printf 'Drift L = 200 m\n' > beamline.txt
exit 0
"#;

const FAILING: &str = r#"#!/bin/sh
echo "giving up" >&2
printf 'partial\n' > field.dat
exit 4
"#;

/// Directory holding the fake simulation programs.
///
/// Written once before any test launches a process.
static BIN: Lazy<tempfile::TempDir> = Lazy::new(|| {
    let dir = tempfile::tempdir().expect("bin dir");
    for (name, body) in [
        ("fast2xy", SOURCE),
        ("wpg_propagate", PROPAGATOR),
        ("wpg_propagate_nan", PROPAGATOR_NAN),
        ("fast2xy_broken", FAILING),
    ] {
        let path = dir.path().join(name);
        fs::write(&path, body).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    }
    dir
});

pub fn bin_dir() -> &'static Path {
    BIN.path()
}

/// Runner using the fake programs, scratch space under `root`.
pub fn runner(root: &Path, configure: impl FnOnce(&mut RuntimeConfig)) -> ProcessRunner {
    let mut config = RuntimeConfig {
        scratch_dir: root.join("scratch"),
        search_path: Some(bin_dir().display().to_string()),
        base_dir: Some(root.to_path_buf()),
        ..RuntimeConfig::default()
    };
    configure(&mut config);
    ProcessRunner::new(config)
}

/// Write a source artifact whose `/version` records `tag`.
pub fn source_artifact(path: &Path, tag: f64) {
    let mut ds = Dataset::new();
    for p in StageKind::Source.schema().provided() {
        ds.insert(p, tag, None).expect("insert");
    }
    ds.write(path).expect("write artifact");
}

pub fn fast_history(root: &Path) -> PathBuf {
    let path = root.join("FAST2XY.DAT");
    fs::write(&path, "# t power\n0.0 1.0\n1.0 2.0\n2.0 1.5\n").expect("write history");
    path
}
