mod common;

use std::fs;

use assert_matches::assert_matches;
use serde_json::json;

use common::MemoryDb;
use kira_seqdb::error::KiraError;
use kira_seqdb::export::{self, ExportOptions, LabelFilters, build_export};
use kira_seqdb::reconcile::WarningKind;

fn export_db() -> MemoryDb {
    let db = MemoryDb::default();
    db.insert(
        "project",
        json!({"project_ref": "AP1", "label_short": "Clearance", "label_long": "Maternal clearance"}),
    );
    db.insert(
        "sample",
        json!({
            "sample_ref": "AS1",
            "project_ref": "AP1",
            "label_short": "wt",
            "species": "danRer",
            "age_hpf": 2,
            "stage": "64-cell",
            "genotype": "WT",
            "molecule": "total RNA",
            "library_protocol": "dUTP",
        }),
    );
    for (order, replicate_ref, sra_ref) in [(2, "AR2", None), (1, "AR1", None), (3, "AR3", Some("SRS3"))] {
        db.insert(
            "replicate",
            json!({
                "replicate_ref": replicate_ref,
                "sample_ref": "AS1",
                "replicate_order": order,
                "label_short": format!("wt 2h r{order}"),
                "label_long": format!("wild type 2 hpf, replicate {order}"),
                "sra_ref": sra_ref,
                "publication_ref": sra_ref.map(|_| "PUB0"),
            }),
        );
    }
    db.insert(
        "run",
        json!({"run_ref": "AN1", "replicate_ref": "AR1", "failed": false, "paired": true, "platform": "Illumina HiSeq 2500"}),
    );
    db.insert(
        "run",
        json!({"run_ref": "AN2", "replicate_ref": "AR1", "failed": true, "paired": true, "platform": "Illumina HiSeq 2500"}),
    );
    db.insert(
        "run",
        json!({"run_ref": "AN3", "replicate_ref": "AR2", "failed": false, "paired": false, "platform": "Illumina HiSeq 2500"}),
    );
    db.insert(
        "run",
        json!({"run_ref": "AN4", "replicate_ref": "AR3", "failed": false, "paired": false, "sra_ref": "SRR4"}),
    );
    db
}

fn options(replicates: &[&str]) -> ExportOptions {
    ExportOptions {
        replicate_refs: replicates.iter().map(|r| r.to_string()).collect(),
        ..ExportOptions::default()
    }
}

#[test]
fn replicates_are_sorted_and_failed_runs_dropped() {
    let db = export_db();
    let export = build_export(&db, &options(&["AR2", "AR1"])).unwrap();

    assert_eq!(export.samples.rows.len(), 2);
    assert_eq!(export.samples.cell(0, "replicate_ref"), Some("AR1"));
    assert_eq!(export.samples.cell(0, "sample_name"), Some("Clearance - wt 2h r1 AR1"));
    assert_eq!(export.samples.cell(0, "organism"), Some("Danio rerio"));
    assert_eq!(export.samples.cell(0, "genotype"), None);
    assert_eq!(export.samples.cell(0, "age"), Some("2"));
    assert_eq!(export.samples.cell(1, "replicate_ref"), Some("AR2"));

    let library_ids: Vec<_> = (0..export.data.rows.len())
        .map(|row| export.data.cell(row, "library_ID").unwrap())
        .collect();
    assert_eq!(library_ids, vec!["AN1", "AN3"]);
    assert_eq!(export.data.cell(0, "library_strategy"), Some("RNA-seq"));
    assert_eq!(export.data.cell(0, "library_source"), Some("TRANSCRIPTOMIC"));
    assert_eq!(export.data.cell(0, "platform"), Some("ILLUMINA"));
    assert_eq!(export.data.cell(0, "filename2"), Some("AN1_R2.fastq.gz"));
    assert_eq!(export.data.cell(1, "library_layout"), Some("single"));
    assert_eq!(export.data.cell(1, "filename2"), None);

    let patterns: Vec<_> = export
        .files
        .iter()
        .map(|file| format!("{}{}", file.run_ref, file.pattern))
        .collect();
    assert_eq!(patterns, vec!["AN1_R1.fastq", "AN1_R2.fastq", "AN3_R1.fastq"]);
    assert!(export.report.warnings.is_empty());
}

#[test]
fn exported_replicates_move_to_their_own_table() {
    let db = export_db();
    let export = build_export(
        &db,
        &ExportOptions {
            exclude_exported: true,
            ..options(&["AR1", "AR3"])
        },
    )
    .unwrap();

    assert_eq!(export.samples.rows.len(), 1);
    assert_eq!(export.exported.rows.len(), 1);
    assert_eq!(export.exported.cell(0, "replicate_sra_ref"), Some("SRS3"));
    assert_eq!(export.exported.cell(0, "run_sra_refs"), Some("SRR4"));
    assert_eq!(export.report.count(WarningKind::Conflict), 1);
    assert!(export.report.warnings[0].message.contains("already exported in PUB0"));
}

#[test]
fn label_filters_and_unknown_replicates() {
    let db = export_db();
    let export = build_export(
        &db,
        &ExportOptions {
            label_filters: LabelFilters::new(vec![("2h".to_string(), "2 hpf".to_string())]),
            ..options(&["AR1", "AR404"])
        },
    )
    .unwrap();

    assert_eq!(export.samples.cell(0, "sample_name"), Some("Clearance - wt 2 hpf r1 AR1"));
    assert_eq!(export.report.count(WarningKind::NotFound), 1);
    assert!(export.report.warnings[0].message.contains("AR404"));
}

#[test]
fn tables_are_written_as_tsv() {
    let db = export_db();
    let dir = tempfile::tempdir().unwrap();
    let filters = dir.path().join("filters.csv");
    fs::write(&filters, "Clearance,Clearance study\n").unwrap();
    let export = build_export(
        &db,
        &ExportOptions {
            label_filters: LabelFilters::from_path(&filters).unwrap(),
            ..options(&["AR1"])
        },
    )
    .unwrap();

    let out = dir.path().join("sra");
    let written = export.write_to(&out).unwrap();
    assert_eq!(written.len(), 3);
    assert!(!out.join(export::EXPORTED_FILE).exists());

    let samples = fs::read_to_string(out.join(export::SAMPLES_FILE)).unwrap();
    let mut lines = samples.lines();
    assert!(lines.next().unwrap().starts_with("sample_name\tsample_title\tbioproject_accession"));
    let row: Vec<_> = lines.next().unwrap().split('\t').collect();
    assert_eq!(row[0], "Clearance study - wt 2h r1 AR1");
    assert_eq!(row[2], "");

    let files: serde_json::Value =
        serde_json::from_slice(&fs::read(out.join(export::FILES_FILE)).unwrap()).unwrap();
    assert_eq!(files[0], json!({"type": "single", "run_ref": "AN1", "pattern": "_R1.fastq"}));
}

#[test]
fn malformed_records_are_database_errors() {
    let db = MemoryDb::default();
    db.insert("replicate", json!({"replicate_ref": "AR1"}));
    let result = build_export(&db, &options(&["AR1"]));
    assert_matches!(result, Err(KiraError::DbResponse(_)));
}
