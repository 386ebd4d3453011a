//! Test doubles and fixture helpers.

mod mock_endpoint;
mod mock_notifier;

pub use mock_endpoint::MockEndpoint;
pub use mock_notifier::MockNotifier;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

/// Write a session bundle tgz with a `Head.json` entry and optional extra
/// entries, returning its path.
pub fn write_test_bundle(
    dir: &Path,
    db_name: &str,
    session: &str,
    created: DateTime<Utc>,
    extra: &[(&str, &[u8])],
) -> PathBuf {
    let path = dir.join(format!("{db_name}.tgz"));
    let file = std::fs::File::create(&path).expect("create bundle file");
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let head = serde_json::json!({
        "session": session,
        "created": created.to_rfc3339(),
        "kind": "standard",
    });
    let head_bytes = serde_json::to_vec_pretty(&head).expect("serialize head");
    append_entry(&mut builder, &format!("{db_name}/Head.json"), &head_bytes);
    for (name, bytes) in extra {
        append_entry(&mut builder, &format!("{db_name}/{name}"), bytes);
    }

    let encoder = builder.into_inner().expect("finish tar");
    encoder.finish().expect("finish gzip");
    path
}

fn append_entry<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, data).expect("append entry");
}

/// Write an installed artifact folder with a `Head.json`, returning the
/// folder path.
pub fn write_test_artifact(
    dir: &Path,
    db_name: &str,
    session: &str,
    created: DateTime<Utc>,
) -> PathBuf {
    let folder = dir.join(db_name);
    std::fs::create_dir_all(&folder).expect("create artifact folder");
    let head = serde_json::json!({
        "session": session,
        "created": created.to_rfc3339(),
        "kind": "standard",
    });
    std::fs::write(
        folder.join("Head.json"),
        serde_json::to_vec_pretty(&head).expect("serialize head"),
    )
    .expect("write head");
    folder
}

/// Write an executable stage script named after `tool`. When `mark` is set
/// the script appends its tool name to the artifact's processing record;
/// otherwise it fails without marking.
pub fn write_step_script(dir: &Path, tool: &str, mark: bool) -> PathBuf {
    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).expect("create bin dir");
    let path = bin.join(tool);
    let script = if mark {
        format!(
            "#!/bin/sh\necho \"{tool} processing $1\"\necho \"{tool}\" >> \"$1/History\"\n"
        )
    } else {
        format!(
            "#!/bin/sh\necho \"{tool} started $1\"\necho \"ERROR: {tool} could not update database\" >&2\nexit 1\n"
        )
    };
    std::fs::write(&path, script).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
    }
    path
}
