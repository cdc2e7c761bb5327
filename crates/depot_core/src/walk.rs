//! Reachability traversal over the object DAG.

use crate::error::{DepotError, Result};
use crate::object_id::{ObjectId, ObjectType};
use crate::odb::ObjectReader;
use crate::types::{self, CommitObj, TagObj, TreeObj};
use std::collections::{HashSet, VecDeque};

/// Walks the object graph from a set of start points.
///
/// Yields every object reachable from the `start` set that is not reachable
/// from the `uninteresting` set. Commits reach their parents and root tree,
/// trees reach their entries, tags reach their target.
pub struct RevWalk<'a> {
    reader: &'a ObjectReader,
    start: Vec<ObjectId>,
    uninteresting: Vec<ObjectId>,
}

impl<'a> RevWalk<'a> {
    /// Creates a walk over the reader's pack snapshot.
    pub fn new(reader: &'a ObjectReader) -> Self {
        Self {
            reader,
            start: Vec::new(),
            uninteresting: Vec::new(),
        }
    }

    /// Adds a start point.
    pub fn mark_start(&mut self, id: ObjectId) {
        self.start.push(id);
    }

    /// Marks an object and everything it reaches as uninteresting.
    pub fn mark_uninteresting(&mut self, id: ObjectId) {
        self.uninteresting.push(id);
    }

    /// Runs the walk and returns the reachable objects in discovery order.
    ///
    /// Objects on the uninteresting frontier may be missing from the store
    /// (their packs can already be gone); missing objects on the start side
    /// are an error.
    pub fn reachable_objects(&mut self) -> Result<Vec<(ObjectId, ObjectType)>> {
        let uninteresting = std::mem::take(&mut self.uninteresting);
        let (_, excluded) = self.traverse(&uninteresting, &HashSet::new(), true)?;

        let start = std::mem::take(&mut self.start);
        let (objects, _) = self.traverse(&start, &excluded, false)?;
        Ok(objects)
    }

    fn traverse(
        &self,
        roots: &[ObjectId],
        skip: &HashSet<ObjectId>,
        tolerate_missing: bool,
    ) -> Result<(Vec<(ObjectId, ObjectType)>, HashSet<ObjectId>)> {
        let mut seen: HashSet<ObjectId> = HashSet::new();
        let mut found = Vec::new();
        let mut queue: VecDeque<ObjectId> = roots.iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            if skip.contains(&id) || !seen.insert(id) {
                continue;
            }

            let (otype, payload) = match self.reader.read_object(&id) {
                Ok(obj) => obj,
                Err(DepotError::ObjectNotFound(_)) if tolerate_missing => continue,
                Err(e) => return Err(e),
            };

            found.push((id, otype));

            match otype {
                ObjectType::Commit => {
                    let commit: CommitObj = types::decode(&payload)?;
                    queue.extend(commit.parents);
                    queue.push_back(commit.tree);
                }
                ObjectType::Tree => {
                    let tree: TreeObj = types::decode(&payload)?;
                    queue.extend(tree.entries.into_iter().map(|e| e.id));
                }
                ObjectType::Tag => {
                    let tag: TagObj = types::decode(&payload)?;
                    queue.push_back(tag.target);
                }
                ObjectType::Blob => {}
            }
        }

        Ok((found, seen))
    }
}
