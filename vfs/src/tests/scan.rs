use std::collections::HashSet;
use std::sync::Arc;

use tempfile::TempDir;

use super::{tar_context, write_tar};
use crate::fixtures::HELLOWORLD_BLOB_CONTENTS;
use crate::{Error, FileHash};

#[tokio::test]
async fn empty_directory_yields_an_empty_index() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    std::fs::create_dir(&data).unwrap();

    let context = tar_context(&tmp.path().join("staging"));
    context.add_root(&data).await.expect("must scan");

    assert!(context.index().all_files().is_empty());
}

#[tokio::test]
async fn relative_roots_are_rejected_without_touching_the_index() {
    let tmp = TempDir::new().unwrap();
    let context = tar_context(&tmp.path().join("staging"));

    let err = context
        .add_root(std::path::Path::new("relative/dir"))
        .await
        .expect_err("must reject");
    assert!(matches!(err, Error::NotAbsolutePath(_)));
    assert!(context.index().all_files().is_empty());
}

#[tokio::test]
async fn flat_directory_indexes_every_file_as_a_root() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    std::fs::create_dir(&data).unwrap();
    std::fs::write(data.join("a.txt"), b"hello     ").unwrap();
    std::fs::write(data.join("b.bin"), &[0x00, 0x01]).unwrap();
    std::fs::write(data.join("c.dat"), vec![7u8; 100]).unwrap();

    let context = tar_context(&tmp.path().join("staging"));
    context.add_root(&data).await.expect("must scan");

    let index = context.index();
    assert_eq!(3, index.all_files().len());

    for name in ["a.txt", "b.bin", "c.dat"] {
        let path = data.join(name).to_string_lossy().into_owned();
        let file = index.by_root_path(&path).expect("file must be indexed");
        assert!(file.is_root());
        assert!(file.hash().is_some());
        assert!(file.last_modified().is_some());
    }

    let a = index
        .by_root_path(&data.join("a.txt").to_string_lossy())
        .unwrap();
    assert_eq!(10, a.size());
    assert_eq!(Some(&FileHash::compute(b"hello     ")), a.hash());
}

#[tokio::test]
async fn rescan_of_unchanged_files_reuses_the_same_nodes() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    std::fs::create_dir(&data).unwrap();
    std::fs::write(data.join("a.txt"), b"hello     ").unwrap();
    std::fs::write(data.join("b.bin"), &[0x00, 0x01]).unwrap();

    let context = tar_context(&tmp.path().join("staging"));
    context.add_root(&data).await.expect("must scan");
    let first = context.index();

    context.add_root(&data).await.expect("must rescan");
    let second = context.index();

    // same set of root names
    let names =
        |files: &[Arc<crate::VirtualFile>]| -> HashSet<String> {
            files.iter().map(|f| f.name().to_owned()).collect()
        };
    assert_eq!(names(first.all_files()), names(second.all_files()));

    // and the nodes themselves were reused, not re-analyzed
    for file in first.all_files() {
        let again = second.by_root_path(file.name()).unwrap();
        assert!(Arc::ptr_eq(file, &again));
    }
}

#[tokio::test]
async fn changed_files_are_reanalyzed_in_place() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    std::fs::create_dir(&data).unwrap();
    let target = data.join("a.txt");
    std::fs::write(&target, b"before").unwrap();

    let context = tar_context(&tmp.path().join("staging"));
    context.add_root(&data).await.expect("must scan");
    let old = context
        .index()
        .by_root_path(&target.to_string_lossy())
        .unwrap();

    std::fs::write(&target, b"afterwards").unwrap();
    context.add_root(&data).await.expect("must rescan");

    let index = context.index();
    assert_eq!(1, index.all_files().len());
    let new = index.by_root_path(&target.to_string_lossy()).unwrap();
    assert_eq!(Some(&FileHash::compute(b"afterwards")), new.hash());
    assert_ne!(old.hash(), new.hash());
}

#[tokio::test]
async fn archives_are_descended_into() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    std::fs::create_dir(&data).unwrap();
    write_tar(
        &data.join("pack.tar"),
        &[("inner/x.txt", HELLOWORLD_BLOB_CONTENTS.to_vec())],
    )
    .await
    .unwrap();

    let context = tar_context(&tmp.path().join("staging"));
    context.add_root(&data).await.expect("must scan");

    let index = context.index();
    let pack = index
        .by_root_path(&data.join("pack.tar").to_string_lossy())
        .expect("archive must be indexed");
    assert!(pack.is_archive());

    let children = pack.children();
    assert_eq!(1, children.len());
    let child = &children[0];
    assert_eq!("inner/x.txt", child.name());
    assert!(Arc::ptr_eq(&child.parent().unwrap(), &pack));
    assert_eq!(
        Some(&FileHash::compute(HELLOWORLD_BLOB_CONTENTS)),
        child.hash()
    );
    assert_eq!(HELLOWORLD_BLOB_CONTENTS.len() as u64, child.size());

    // virtual children are reachable through every lookup table
    assert!(index
        .by_full_path(&format!(
            "{}|inner/x.txt",
            data.join("pack.tar").to_string_lossy()
        ))
        .is_some());
    assert!(index.by_name("x.txt").is_some());
    assert_eq!(
        1,
        index
            .by_hash(&FileHash::compute(HELLOWORLD_BLOB_CONTENTS))
            .unwrap()
            .len()
    );
}

#[tokio::test]
async fn nested_archives_are_descended_recursively() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    std::fs::create_dir(&data).unwrap();

    let scratch = tmp.path().join("build");
    std::fs::create_dir(&scratch).unwrap();
    write_tar(
        &scratch.join("middle.tar"),
        &[("leaf.txt", b"leafy".to_vec())],
    )
    .await
    .unwrap();
    let middle_bytes = std::fs::read(scratch.join("middle.tar")).unwrap();
    write_tar(&data.join("outer.tar"), &[("middle.tar", middle_bytes)])
        .await
        .unwrap();

    let context = tar_context(&tmp.path().join("staging"));
    context.add_root(&data).await.expect("must scan");

    let index = context.index();
    let leaf = index
        .file_for_archive_hash_path(
            index
                .by_root_path(&data.join("outer.tar").to_string_lossy())
                .unwrap()
                .hash()
                .unwrap(),
            &["middle.tar", "leaf.txt"],
        )
        .expect("hash path must resolve");
    assert_eq!("leaf.txt", leaf.name());
    assert_eq!(2, leaf.nesting_factor());
    assert_eq!(Some(&FileHash::compute(b"leafy")), leaf.hash());

    // analysis scratch directories are cleaned up
    assert_eq!(
        0,
        std::fs::read_dir(tmp.path().join("staging")).unwrap().count()
    );
}

#[tokio::test]
async fn unextractable_archives_stay_as_leaves() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    std::fs::create_dir(&data).unwrap();
    std::fs::write(data.join("garbage.tar"), b"not a tarball").unwrap();

    let context = tar_context(&tmp.path().join("staging"));
    context.add_root(&data).await.expect("scan must not fail");

    let index = context.index();
    let garbage = index
        .by_root_path(&data.join("garbage.tar").to_string_lossy())
        .expect("file must still be indexed");
    assert!(!garbage.is_archive());
    assert_eq!(Some(&FileHash::compute(b"not a tarball")), garbage.hash());
}
