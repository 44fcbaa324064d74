use camino::Utf8PathBuf;

use kira_seqdb::domain::{Project, ProjectRef, Run, Sample};
use kira_seqdb::store::ProjectStore;

fn temp_store() -> (tempfile::TempDir, ProjectStore) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, ProjectStore::with_root(root))
}

#[test]
fn project_round_trip_writes_sidecar() {
    let (_dir, store) = temp_store();
    let reference: ProjectRef = "SRP100".parse().unwrap();
    let project = Project {
        title: Some("Zygotic genome activation".to_string()),
        samples: vec![Sample {
            reference: Some("SRS10".to_string()),
            name: Some("GSM1".to_string()),
            attributes: vec![("replicate_ref".to_string(), "AR001".to_string())],
            runs: vec![Run {
                reference: "SRR11".to_string(),
                spots: 100,
                ..Run::default()
            }],
            ..Sample::default()
        }],
    };

    assert!(!store.has_project(&reference));
    assert_eq!(store.load_project(&reference).unwrap(), None);

    let path = store.save_project(&reference, &project).unwrap();
    assert!(path.ends_with("projects/SRP100.json"));
    assert!(store.has_project(&reference));
    assert_eq!(store.load_project(&reference).unwrap(), Some(project));

    let metadata = store.load_metadata(&reference).unwrap().unwrap();
    assert_eq!(metadata.project, "SRP100");
    assert_eq!(metadata.samples, 1);
    assert_eq!(metadata.runs, 1);
    assert!(metadata.tool.starts_with("kira-seqdb/"));
}

#[test]
fn interchange_uses_short_field_names() {
    let (_dir, store) = temp_store();
    let reference: ProjectRef = "SRP7".parse().unwrap();
    let project = Project {
        title: None,
        samples: vec![Sample {
            reference: Some("SRS7".to_string()),
            runs: vec![Run {
                reference: "SRR7".to_string(),
                spots: 7,
                source_url: Some("https://x/SRR7".to_string()),
                ..Run::default()
            }],
            ..Sample::default()
        }],
    };
    let path = store.save_project(&reference, &project).unwrap();
    let content = std::fs::read_to_string(path.as_std_path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(value["samples"][0]["ref"], "SRS7");
    assert_eq!(value["samples"][0]["runs"][0]["ref"], "SRR7");
    assert_eq!(value["samples"][0]["runs"][0]["sra_url"], "https://x/SRR7");
}
