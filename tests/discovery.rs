mod common;

use std::fs;
use std::io::Write;

use assert_matches::assert_matches;

use common::{fastq_records, write_fastq_gz};
use kira_seqdb::discovery::{RunFileIndex, default_fastq_exts};
use kira_seqdb::domain::ReadEnd;
use kira_seqdb::error::KiraError;
use kira_seqdb::fastq;
use kira_seqdb::filenames::default_conventions;

const FLOWCELL: &str = "DCM97JN1:188:C11R8ACXX";

#[test]
fn paired_run_is_grouped_and_consistent() {
    let dir = tempfile::tempdir().unwrap();
    write_fastq_gz(&dir.path().join("sampleA_ACGT_L005_R1_001.fastq.gz"), FLOWCELL, 5, 1, 3);
    write_fastq_gz(&dir.path().join("sampleA_ACGT_L005_R2_001.fastq.gz"), FLOWCELL, 5, 2, 3);
    fs::write(dir.path().join("notes.txt"), "not a read file").unwrap();

    let index =
        RunFileIndex::discover(dir.path(), &default_fastq_exts(), &default_conventions()).unwrap();
    assert!(index.validate());
    assert_eq!(index.names().collect::<Vec<_>>(), vec!["sampleA"]);

    let files = index.get("sampleA").unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].end, Some(ReadEnd::R1));
    assert_eq!(files[1].end, Some(ReadEnd::R2));

    let first = fastq::inspect(&files[0].path(), true).unwrap();
    let second = fastq::inspect(&files[1].path(), true).unwrap();
    assert_eq!(first.flowcell, second.flowcell);
    assert_eq!(first.flowcell_id(), "C11R8ACXX");
    assert_eq!(first.lane, 5);
    assert_eq!(second.pair_index, 2);
    assert_eq!(first.spot_count, Some(3));
    assert_eq!(first.read_length, 10);

    let again =
        RunFileIndex::discover(dir.path(), &default_fastq_exts(), &default_conventions()).unwrap();
    assert_eq!(index, again);
}

#[test]
fn same_name_in_two_directories_is_a_collision() {
    let dir = tempfile::tempdir().unwrap();
    let lane1 = dir.path().join("lane1");
    let lane2 = dir.path().join("lane2");
    fs::create_dir_all(&lane1).unwrap();
    fs::create_dir_all(&lane2).unwrap();
    write_fastq_gz(&lane1.join("wt_R1.fastq.gz"), FLOWCELL, 1, 1, 1);
    write_fastq_gz(&lane2.join("wt_R2.fastq.gz"), FLOWCELL, 2, 2, 1);

    let index =
        RunFileIndex::discover(dir.path(), &default_fastq_exts(), &default_conventions()).unwrap();
    assert!(!index.validate());
    assert_matches!(
        index.ensure_valid(),
        Err(KiraError::NameCollision { name, directories }) if name == "wt" && directories.len() == 2
    );
}

#[test]
fn zstd_files_are_inspected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mut_R1.fastq.zst");
    let compressed = zstd::encode_all(fastq_records(FLOWCELL, 3, 1, 4).as_bytes(), 3).unwrap();
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(&compressed).unwrap();

    let index =
        RunFileIndex::discover(dir.path(), &default_fastq_exts(), &default_conventions()).unwrap();
    let files = index.get("mut").unwrap();
    let info = fastq::inspect(&files[0].path(), true).unwrap();
    assert_eq!(info.lane, 3);
    assert_eq!(info.spot_count, Some(4));
}

#[test]
fn bad_header_is_reported_with_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken_R1.fastq");
    fs::write(&path, "ACGT\nACGT\n+\nIIII\n").unwrap();

    let result = fastq::inspect(&path, false);
    assert_matches!(result, Err(KiraError::ReadFormat { path: reported, .. }) if reported.ends_with("broken_R1.fastq"));
}

#[cfg(unix)]
#[test]
fn linked_directory_is_followed() {
    let outside = tempfile::tempdir().unwrap();
    write_fastq_gz(&outside.path().join("ext_R1.fastq.gz"), FLOWCELL, 3, 1, 1);
    let dir = tempfile::tempdir().unwrap();
    write_fastq_gz(&dir.path().join("wt_R1.fastq.gz"), FLOWCELL, 5, 1, 1);
    std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();

    let index =
        RunFileIndex::discover(dir.path(), &default_fastq_exts(), &default_conventions()).unwrap();
    assert!(index.validate());
    assert_eq!(index.names().collect::<Vec<_>>(), vec!["ext", "wt"]);
    let ext = &index.get("ext").unwrap()[0];
    assert_eq!(ext.directory, dir.path().join("linked"));
}

#[cfg(unix)]
#[test]
fn linked_file_is_grouped_by_its_link_name() {
    let outside = tempfile::tempdir().unwrap();
    let target = outside.path().join("download.fastq.gz");
    write_fastq_gz(&target, FLOWCELL, 2, 1, 4);
    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(&target, dir.path().join("ko_R1.fastq.gz")).unwrap();
    std::os::unix::fs::symlink(outside.path().join("gone"), dir.path().join("dangling_R1.fastq.gz"))
        .unwrap();

    let index =
        RunFileIndex::discover(dir.path(), &default_fastq_exts(), &default_conventions()).unwrap();
    assert_eq!(index.names().collect::<Vec<_>>(), vec!["ko"]);
    let info = fastq::inspect(&index.get("ko").unwrap()[0].path(), true).unwrap();
    assert_eq!(info.spot_count, Some(4));
}

#[cfg(unix)]
#[test]
fn directory_loop_is_walked_once() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("lane5");
    fs::create_dir_all(&nested).unwrap();
    write_fastq_gz(&nested.join("wt_R1.fastq.gz"), FLOWCELL, 5, 1, 1);
    std::os::unix::fs::symlink(dir.path(), nested.join("up")).unwrap();
    std::os::unix::fs::symlink(&nested, nested.join("self")).unwrap();

    let index =
        RunFileIndex::discover(dir.path(), &default_fastq_exts(), &default_conventions()).unwrap();
    assert!(index.validate());
    assert_eq!(index.names().collect::<Vec<_>>(), vec!["wt"]);
    assert_eq!(index.get("wt").unwrap().len(), 1);
}
