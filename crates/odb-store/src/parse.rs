//! Materializing node payloads from raw object content.
//!
//! Commits and tags reference other objects; parsing them registers those
//! objects in the registry under the kind the reference implies, without
//! reading them.

use odb_types::{HashAlgorithm, ObjectId, ObjectKind};

use crate::error::{StoreError, StoreResult};
use crate::object::{CommitData, ObjectHandle, Payload, TagData, TreeEntry};
use crate::registry::ObjectRegistry;

/// Parse `data` as `kind` and attach the result to the node for `id`.
///
/// A node that is already parsed is returned unchanged.
pub fn parse_object_buffer(
    registry: &mut ObjectRegistry,
    algo: HashAlgorithm,
    id: ObjectId,
    kind: ObjectKind,
    data: &[u8],
) -> StoreResult<ObjectHandle> {
    let handle = registry.lookup_kind(id, kind)?;
    if registry.get(handle).is_parsed() {
        return Ok(handle);
    }
    let payload = match kind {
        ObjectKind::Blob => Payload::Blob,
        ObjectKind::Tree => Payload::Tree(parse_tree_buffer(algo, &id, data)?),
        ObjectKind::Commit => Payload::Commit(parse_commit_buffer(registry, algo, &id, data)?),
        ObjectKind::Tag => Payload::Tag(parse_tag_buffer(registry, algo, &id, data)?),
    };
    registry.mark_parsed(handle, kind, data.len() as u64, payload)?;
    Ok(handle)
}

/// Decode a binary tree: repeated `<octal mode> <name>\0<raw id>`.
pub fn parse_tree_buffer(
    algo: HashAlgorithm,
    id: &ObjectId,
    mut data: &[u8],
) -> StoreResult<Vec<TreeEntry>> {
    let raw_len = algo.raw_len();
    let mut entries = Vec::new();
    while !data.is_empty() {
        let space = data
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| StoreError::corrupt(*id, "tree entry without mode"))?;
        let mode = std::str::from_utf8(&data[..space])
            .ok()
            .filter(|m| !m.is_empty())
            .and_then(|m| u32::from_str_radix(m, 8).ok())
            .ok_or_else(|| StoreError::corrupt(*id, "malformed mode in tree entry"))?;
        let rest = &data[space + 1..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| StoreError::corrupt(*id, "tree entry name not terminated"))?;
        if nul == 0 {
            return Err(StoreError::corrupt(*id, "empty filename in tree entry"));
        }
        let name = rest[..nul].to_vec();
        let raw = rest
            .get(nul + 1..nul + 1 + raw_len)
            .ok_or_else(|| StoreError::corrupt(*id, "truncated tree entry"))?;
        entries.push(TreeEntry {
            mode,
            name,
            id: ObjectId::from_raw(raw)?,
        });
        data = &rest[nul + 1 + raw_len..];
    }
    Ok(entries)
}

/// Decode a commit's header: `tree`, then any `parent` lines, then the
/// committer timestamp.
pub fn parse_commit_buffer(
    registry: &mut ObjectRegistry,
    algo: HashAlgorithm,
    id: &ObjectId,
    data: &[u8],
) -> StoreResult<CommitData> {
    let bogus = || StoreError::corrupt(*id, "bogus commit object");
    let mut lines = header_lines(data);

    let tree_line = lines.next().ok_or_else(bogus)?;
    let tree_hex = tree_line.strip_prefix(b"tree ").ok_or_else(bogus)?;
    let tree_id = parse_hex(algo, tree_hex).ok_or_else(bogus)?;
    let tree = registry.lookup_tree(tree_id)?;

    let mut parents = Vec::new();
    let mut date = 0;
    for line in lines {
        if let Some(hex) = line.strip_prefix(b"parent ") {
            let parent = parse_hex(algo, hex)
                .ok_or_else(|| StoreError::corrupt(*id, "bad parent line in commit"))?;
            parents.push(registry.lookup_commit(parent)?);
        } else if let Some(ident) = line.strip_prefix(b"committer ") {
            date = ident_timestamp(ident);
        }
    }
    Ok(CommitData {
        tree,
        parents,
        date,
    })
}

/// Decode an annotated tag's header.
pub fn parse_tag_buffer(
    registry: &mut ObjectRegistry,
    algo: HashAlgorithm,
    id: &ObjectId,
    data: &[u8],
) -> StoreResult<TagData> {
    let bad = |what: &str| StoreError::corrupt(*id, format!("bad tag: {what}"));
    let mut lines = header_lines(data);

    let object = lines
        .next()
        .and_then(|l| l.strip_prefix(b"object "))
        .and_then(|hex| parse_hex(algo, hex))
        .ok_or_else(|| bad("object line"))?;
    let tagged_kind = lines
        .next()
        .and_then(|l| l.strip_prefix(b"type "))
        .and_then(ObjectKind::from_name)
        .ok_or_else(|| bad("type line"))?;
    let name = lines
        .next()
        .and_then(|l| l.strip_prefix(b"tag "))
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .ok_or_else(|| bad("tag line"))?;
    let date = lines
        .next()
        .and_then(|l| l.strip_prefix(b"tagger "))
        .map(ident_timestamp)
        .unwrap_or(0);

    let tagged = registry.lookup_kind(object, tagged_kind)?;
    Ok(TagData {
        tagged,
        tagged_kind,
        name,
        date,
    })
}

/// Header lines up to the first blank line.
fn header_lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.split(|&b| b == b'\n').take_while(|l| !l.is_empty())
}

fn parse_hex(algo: HashAlgorithm, hex: &[u8]) -> Option<ObjectId> {
    let s = std::str::from_utf8(hex).ok()?;
    ObjectId::from_hex_with(s, algo).ok()
}

/// Seconds from an identity line `Name <email> <seconds> <tz>`; 0 when unparseable.
fn ident_timestamp(ident: &[u8]) -> i64 {
    let after_email = match ident.iter().rposition(|&b| b == b'>') {
        Some(pos) => &ident[pos + 1..],
        None => return 0,
    };
    std::str::from_utf8(after_email)
        .ok()
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALGO: HashAlgorithm = HashAlgorithm::Sha1;

    fn id(seed: &[u8]) -> ObjectId {
        ALGO.hash_object(ObjectKind::Blob, seed)
    }

    fn tree_bytes(entries: &[(&str, &str, ObjectId)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (mode, name, id) in entries {
            out.extend_from_slice(mode.as_bytes());
            out.push(b' ');
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(id.as_bytes());
        }
        out
    }

    #[test]
    fn parse_tree_entries() {
        let data = tree_bytes(&[("100644", "README", id(b"r")), ("40000", "src", id(b"s"))]);
        let entries = parse_tree_buffer(ALGO, &id(b"tree"), &data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, b"README");
        assert_eq!(entries[0].mode, 0o100644);
        assert_eq!(entries[1].id, id(b"s"));
        assert!(entries[1].is_tree());
    }

    #[test]
    fn truncated_tree_is_corrupt() {
        let mut data = tree_bytes(&[("100644", "a", id(b"a"))]);
        data.truncate(data.len() - 3);
        let err = parse_tree_buffer(ALGO, &id(b"t"), &data).unwrap_err();
        assert!(err.is_corrupt());

        let err = parse_tree_buffer(ALGO, &id(b"t"), b"10x644 a\0").unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn parse_commit_links_tree_and_parents() {
        let mut reg = ObjectRegistry::new();
        let body = format!(
            "tree {}\nparent {}\nparent {}\nauthor A <a@x> 1000 +0000\ncommitter C <c@x> 1700000000 -0700\n\nmsg\n",
            id(b"tree"),
            id(b"p1"),
            id(b"p2")
        );
        let commit_id = ALGO.hash_object(ObjectKind::Commit, body.as_bytes());
        let h = parse_object_buffer(&mut reg, ALGO, commit_id, ObjectKind::Commit, body.as_bytes())
            .unwrap();

        let commit = reg.get(h).as_commit().unwrap().clone();
        assert_eq!(commit.date, 1_700_000_000);
        assert_eq!(commit.parents.len(), 2);
        assert_eq!(reg.get(commit.tree).kind(), Some(ObjectKind::Tree));
        assert_eq!(reg.get(commit.parents[1]).id(), &id(b"p2"));
        assert!(!reg.get(commit.parents[0]).is_parsed());
        assert_eq!(reg.get(h).size(), Some(body.len() as u64));
    }

    #[test]
    fn commit_without_tree_is_corrupt() {
        let mut reg = ObjectRegistry::new();
        let err = parse_commit_buffer(&mut reg, ALGO, &id(b"c"), b"parent abc\n\n").unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn parse_tag() {
        let mut reg = ObjectRegistry::new();
        let body = format!(
            "object {}\ntype commit\ntag v1.0\ntagger T <t@x> 42 +0000\n\nrelease\n",
            id(b"target")
        );
        let tag_id = ALGO.hash_object(ObjectKind::Tag, body.as_bytes());
        let h = parse_object_buffer(&mut reg, ALGO, tag_id, ObjectKind::Tag, body.as_bytes())
            .unwrap();
        let tag = reg.get(h).as_tag().unwrap();
        assert_eq!(tag.name, "v1.0");
        assert_eq!(tag.date, 42);
        assert_eq!(tag.tagged_kind, ObjectKind::Commit);
        assert_eq!(reg.get(tag.tagged).kind(), Some(ObjectKind::Commit));
    }

    #[test]
    fn tag_with_unknown_target_type_is_corrupt() {
        let mut reg = ObjectRegistry::new();
        let body = format!("object {}\ntype widget\ntag x\n", id(b"t"));
        let err = parse_tag_buffer(&mut reg, ALGO, &id(b"tag"), body.as_bytes()).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn tag_target_kind_conflict_is_fatal() {
        let mut reg = ObjectRegistry::new();
        reg.lookup_blob(id(b"t")).unwrap();
        let body = format!("object {}\ntype tree\ntag x\n", id(b"t"));
        let err = parse_tag_buffer(&mut reg, ALGO, &id(b"tag"), body.as_bytes()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn reparse_returns_existing_node() {
        let mut reg = ObjectRegistry::new();
        let blob = id(b"data");
        let a = parse_object_buffer(&mut reg, ALGO, blob, ObjectKind::Blob, b"data").unwrap();
        let b = parse_object_buffer(&mut reg, ALGO, blob, ObjectKind::Blob, b"data").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ident_timestamp_edge_cases() {
        assert_eq!(ident_timestamp(b"Name <e> 123 +0000"), 123);
        assert_eq!(ident_timestamp(b"Name <e>"), 0);
        assert_eq!(ident_timestamp(b"no email 55"), 0);
    }
}
