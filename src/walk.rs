//! Recursive spreadsheet discovery under a Drive folder.

use crate::export::sanitize_file_name;
use crate::google::drive::FolderLister;
use anyhow::Result;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use tracing::debug;

/// A spreadsheet found during the walk, with the folder path it sits under
/// relative to the walk root (empty for spreadsheets directly in the root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetHit {
    pub id: String,
    pub name: String,
    pub relative_path: PathBuf,
}

/// Lazy depth-first walk yielding every spreadsheet under a root folder.
///
/// Folders are listed on demand as the consumer pulls hits. The walk is
/// single-pass: once `next` returns `Ok(None)` it stays exhausted. A listing
/// failure surfaces as an error and nothing below the failing folder is
/// yielded.
pub struct SpreadsheetWalk<'a, L: FolderLister + ?Sized> {
    lister: &'a mut L,
    pending: Vec<(PathBuf, String)>,
    found: VecDeque<SpreadsheetHit>,
    skip: HashSet<String>,
}

impl<'a, L: FolderLister + ?Sized> SpreadsheetWalk<'a, L> {
    pub fn new(lister: &'a mut L, root_folder_id: &str, skip: HashSet<String>) -> Self {
        Self {
            lister,
            pending: vec![(PathBuf::new(), root_folder_id.to_string())],
            found: VecDeque::new(),
            skip,
        }
    }

    /// The next spreadsheet, or `Ok(None)` once the tree is exhausted.
    pub async fn next(&mut self) -> Result<Option<SpreadsheetHit>> {
        loop {
            if let Some(hit) = self.found.pop_front() {
                return Ok(Some(hit));
            }
            let Some((path, folder_id)) = self.pending.pop() else {
                return Ok(None);
            };

            for child in self.lister.list_children(&folder_id).await? {
                if child.is_folder() {
                    if self.skip.contains(&child.name) {
                        debug!("skipping folder {}", child.name);
                        continue;
                    }
                    let child_path = path.join(sanitize_file_name(&child.name));
                    self.pending.push((child_path, child.id));
                } else if child.is_spreadsheet() {
                    self.found.push_back(SpreadsheetHit {
                        id: child.id,
                        name: child.name,
                        relative_path: path.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::drive::{DriveEntry, FOLDER_MIME_TYPE, SPREADSHEET_MIME_TYPE};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;

    fn folder(id: &str, name: &str) -> DriveEntry {
        DriveEntry {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
        }
    }

    fn spreadsheet(id: &str, name: &str) -> DriveEntry {
        DriveEntry {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: SPREADSHEET_MIME_TYPE.to_string(),
        }
    }

    fn document(id: &str, name: &str) -> DriveEntry {
        DriveEntry {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: "application/vnd.google-apps.document".to_string(),
        }
    }

    /// In-memory folder tree with an optional folder that fails to list.
    struct FakeTree {
        children: HashMap<String, Vec<DriveEntry>>,
        fail_on: Option<String>,
        listings: usize,
    }

    impl FakeTree {
        fn new(children: Vec<(&str, Vec<DriveEntry>)>) -> Self {
            Self {
                children: children
                    .into_iter()
                    .map(|(id, entries)| (id.to_string(), entries))
                    .collect(),
                fail_on: None,
                listings: 0,
            }
        }
    }

    #[async_trait]
    impl FolderLister for FakeTree {
        async fn list_children(&mut self, folder_id: &str) -> Result<Vec<DriveEntry>> {
            self.listings += 1;
            if self.fail_on.as_deref() == Some(folder_id) {
                bail!("listing folder {folder_id} failed");
            }
            Ok(self.children.get(folder_id).cloned().unwrap_or_default())
        }
    }

    async fn collect(walk: &mut SpreadsheetWalk<'_, FakeTree>) -> Vec<SpreadsheetHit> {
        let mut hits = Vec::new();
        while let Some(hit) = walk.next().await.unwrap() {
            hits.push(hit);
        }
        hits
    }

    #[tokio::test]
    async fn finds_spreadsheets_at_every_depth() {
        let mut tree = FakeTree::new(vec![
            (
                "root",
                vec![
                    spreadsheet("s1", "Top"),
                    folder("f1", "sub"),
                    document("d1", "readme"),
                ],
            ),
            (
                "f1",
                vec![spreadsheet("s2", "Nested"), folder("f2", "deeper")],
            ),
            ("f2", vec![spreadsheet("s3", "Deepest")]),
        ]);

        let mut walk = SpreadsheetWalk::new(&mut tree, "root", HashSet::new());
        let mut hits = collect(&mut walk).await;
        hits.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].relative_path, Path::new(""));
        assert_eq!(hits[1].relative_path, Path::new("sub"));
        assert_eq!(hits[2].relative_path, Path::new("sub").join("deeper"));
        assert_eq!(hits[2].name, "Deepest");
    }

    #[tokio::test]
    async fn exhausted_walk_stays_exhausted() {
        let mut tree = FakeTree::new(vec![("root", vec![spreadsheet("s1", "Only")])]);
        let mut walk = SpreadsheetWalk::new(&mut tree, "root", HashSet::new());

        assert!(walk.next().await.unwrap().is_some());
        assert!(walk.next().await.unwrap().is_none());
        assert!(walk.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skipped_folders_are_never_listed() {
        let mut tree = FakeTree::new(vec![
            (
                "root",
                vec![folder("f1", "Archive_1"), folder("f2", "current")],
            ),
            ("f1", vec![spreadsheet("s1", "Old")]),
            ("f2", vec![spreadsheet("s2", "New")]),
        ]);

        let skip: HashSet<String> = ["Archive_1".to_string()].into_iter().collect();
        let mut walk = SpreadsheetWalk::new(&mut tree, "root", skip);
        let hits = collect(&mut walk).await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "New");
        // root + current only; Archive_1 was pruned before listing
        assert_eq!(tree.listings, 2);
    }

    #[tokio::test]
    async fn folder_names_are_made_filesystem_safe() {
        let mut tree = FakeTree::new(vec![
            ("root", vec![folder("f1", "a/b")]),
            ("f1", vec![spreadsheet("s1", "Data")]),
        ]);

        let mut walk = SpreadsheetWalk::new(&mut tree, "root", HashSet::new());
        let hits = collect(&mut walk).await;

        assert_eq!(hits[0].relative_path, Path::new("a_b"));
    }

    #[tokio::test]
    async fn listing_failure_ends_the_walk_with_an_error() {
        let mut tree = FakeTree::new(vec![
            ("root", vec![folder("f1", "broken")]),
            ("f1", vec![spreadsheet("s1", "Unreachable")]),
        ]);
        tree.fail_on = Some("f1".to_string());

        let mut walk = SpreadsheetWalk::new(&mut tree, "root", HashSet::new());
        let err = walk.next().await.unwrap_err();
        assert!(err.to_string().contains("f1"));
    }

    #[tokio::test]
    async fn nothing_is_yielded_from_a_failing_subtree() {
        let mut tree = FakeTree::new(vec![
            (
                "root",
                vec![spreadsheet("s0", "Reachable"), folder("f1", "broken")],
            ),
            ("f1", vec![spreadsheet("s1", "Unreachable")]),
        ]);
        tree.fail_on = Some("f1".to_string());

        let mut walk = SpreadsheetWalk::new(&mut tree, "root", HashSet::new());
        let mut yielded = Vec::new();
        let mut failed = false;
        loop {
            match walk.next().await {
                Ok(Some(hit)) => yielded.push(hit.name),
                Ok(None) => break,
                Err(_) => {
                    failed = true;
                    break;
                }
            }
        }

        assert!(failed);
        assert_eq!(yielded, vec!["Reachable"]);
    }
}
