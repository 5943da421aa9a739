//! Interop tests against h5py (Python).
//!
//! Tests are skipped if python3 or h5py are not available.

use std::process::Command;

use hdf5_access::{ContainerFile, DimensionSizes, MatrixDataType, SELF, UNLIMITED};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn python_available() -> bool {
    Command::new("python3")
        .args(["-c", "import h5py, numpy; print(h5py.__version__)"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

macro_rules! skip_if_no_python {
    () => {
        if !python_available() {
            eprintln!("SKIP: python3 with h5py not available");
            return;
        }
    };
}

/// Run a Python script and return stdout as a trimmed string.
fn run_python(script: &str) -> String {
    let output = Command::new("python3")
        .args(["-c", script])
        .output()
        .expect("failed to run python3");
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!("Python script failed:\nSTDERR: {stderr}");
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

// ---------------------------------------------------------------------------
// We write, h5py reads
// ---------------------------------------------------------------------------

#[test]
fn h5py_reads_groups_datasets_and_attributes() {
    skip_if_no_python!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("written.h5");
    {
        let file = ContainerFile::create(&path).unwrap();
        {
            let root = file.root_group();
            let group = root.create_group("group").unwrap();
            let size = DimensionSizes::new(4, 3, 2);
            let ds = group
                .create_dataset("data", size, size, MatrixDataType::UInt16, 0)
                .unwrap();
            let values: Vec<u16> = (0..24).collect();
            ds.write_complete_dataset(&values).unwrap();
            ds.write_string_attribute("units", "contents").unwrap();
            group.write_attribute(SELF, "scale", vec![7357.5f32, 73576.0, 57.476_562_5]).unwrap();
            root.write_attribute(SELF, "count", 73571u64).unwrap();

            let stream = group
                .create_dataset(
                    "stream",
                    DimensionSizes::new(3, 2, 2),
                    DimensionSizes::new(3, 2, UNLIMITED),
                    MatrixDataType::Double,
                    5,
                )
                .unwrap();
            stream.write_complete_dataset(&[1.5f64; 12]).unwrap();
        }
        file.close().unwrap();
    }

    let script = format!(
        r#"
import h5py
with h5py.File({path:?}, "r") as f:
    d = f["group/data"]
    s = f["group/stream"]
    print(d.shape, d.dtype, int(d[1, 2, 3]), d.attrs["units"].decode() if isinstance(d.attrs["units"], bytes) else d.attrs["units"])
    print([float(v) for v in f["group"].attrs["scale"]], int(f.attrs["count"]))
    print(s.shape, s.maxshape, s.compression, float(s[()].sum()))
"#,
        path = path.display().to_string()
    );
    let out = run_python(&script);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "(2, 3, 4) uint16 23 contents");
    assert_eq!(lines[1], "[7357.5, 73576.0, 57.4765625] 73571");
    assert_eq!(lines[2], "(2, 2, 3) (None, 2, 3) gzip 18.0");
}

// ---------------------------------------------------------------------------
// h5py writes, we read
// ---------------------------------------------------------------------------

#[test]
fn reads_files_written_by_h5py() {
    skip_if_no_python!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foreign.h5");
    let script = format!(
        r#"
import h5py, numpy as np
with h5py.File({path:?}, "w") as f:
    g = f.create_group("group")
    g.create_dataset("data", data=np.arange(24, dtype=">i4").reshape(2, 3, 4))
    g.create_dataset("packed", data=np.ones((8, 8, 8), dtype="f4"), chunks=(4, 4, 4), compression="gzip", shuffle=True)
    g.attrs["name"] = "contents"
    g.attrs.create("fixed", np.bytes_("padded"), dtype="S10")
    f.attrs["count"] = np.uint64(73571)
    f["alias"] = h5py.SoftLink("/group/data")
"#,
        path = path.display().to_string()
    );
    run_python(&script);

    assert!(ContainerFile::can_access(&path));
    let file = ContainerFile::open(&path).unwrap();
    let root = file.root_group();
    assert_eq!(root.read_attribute::<u64>(SELF, "count").unwrap(), 73571);
    assert_eq!(root.read_string_attribute("group", "name").unwrap(), "contents");
    assert_eq!(root.read_string_attribute("group", "fixed").unwrap(), "padded");

    let group = root.open_group("group").unwrap();
    let data = group.open_dataset("data").unwrap();
    assert_eq!(data.dimension_sizes().unwrap(), DimensionSizes::new(4, 3, 2));
    assert_eq!(data.read_matrix_data_type().unwrap(), MatrixDataType::Int32);
    let values = data.read_complete_dataset::<i32>().unwrap();
    assert_eq!(values, (0..24).collect::<Vec<i32>>());

    let packed = group.open_dataset("packed").unwrap();
    assert_eq!(packed.chunk_dimensions().unwrap(), Some(DimensionSizes::new(4, 4, 4)));
    assert!(packed.read_complete_dataset::<f32>().unwrap().iter().all(|&v| v == 1.0));

    let alias = root.open_dataset("alias").unwrap();
    assert_eq!(alias.dimension_sizes().unwrap(), DimensionSizes::new(4, 3, 2));
}

#[test]
fn rewrites_h5py_file_in_place() {
    skip_if_no_python!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modified.h5");
    let path_str = path.display().to_string();
    run_python(&format!(
        r#"
import h5py, numpy as np
with h5py.File({path_str:?}, "w") as f:
    f.create_dataset("data", data=np.arange(6, dtype="u1").reshape(2, 3))
    f.attrs["note"] = "kept"
"#
    ));

    {
        let file = ContainerFile::open(&path).unwrap();
        file.root_group().write_attribute(SELF, "added", 1.25f64).unwrap();
        file.close().unwrap();
    }

    let out = run_python(&format!(
        r#"
import h5py
with h5py.File({path_str:?}, "r") as f:
    note = f.attrs["note"]
    note = note.decode() if isinstance(note, bytes) else note
    print(note, float(f.attrs["added"]), f["data"][:].tolist())
"#
    ));
    assert_eq!(out, "kept 1.25 [[0, 1, 2], [3, 4, 5]]");
}
