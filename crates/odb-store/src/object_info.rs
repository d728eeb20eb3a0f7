//! Tiered object lookup.
//!
//! [`RepositoryObjectStore::locate`] answers "what is this object" by trying,
//! in order: the in-memory cache, the local loose directory, the local packs
//! (most recently hit first), then each alternate's loose directory and
//! packs. A miss everywhere triggers one rescan of the pack directories
//! before the object is declared missing, unless the lookup is
//! [`ObjectInfoFlags::QUICK`]. Quick lookups also trust each alternate's
//! cached loose listing instead of checking the filesystem.

use odb_pack::{PackedObject, PackedObjectHeader};
use odb_types::{ObjectId, ObjectKind};
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::loose::{read_loose_object, read_loose_object_at, LooseObject};
use crate::object::ObjectType;
use crate::packs::{PackList, PackLookup};
use crate::repository::RepositoryObjectStore;

bitflags::bitflags! {
    /// Modifiers for [`RepositoryObjectStore::locate`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ObjectInfoFlags: u32 {
        /// Resolve replace refs before looking up.
        const LOOKUP_REPLACE = 1 << 0;
        /// Report unrecognized loose type names instead of treating them as corruption.
        const ALLOW_UNKNOWN_TYPE = 1 << 1;
        /// Bypass the in-memory tier.
        const SKIP_CACHE = 1 << 2;
        /// Do not rescan pack directories on a miss, and check alternate
        /// loose objects against the cached directory listing.
        const QUICK = 1 << 3;
    }
}

/// Which parts of an object the caller needs beyond kind and size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InfoRequest {
    pub content: bool,
    pub disk_size: bool,
}

impl InfoRequest {
    /// Kind and size only.
    pub const HEADER: Self = Self {
        content: false,
        disk_size: false,
    };
    /// Kind, size and content.
    pub const CONTENT: Self = Self {
        content: true,
        disk_size: false,
    };

    pub fn with_disk_size(mut self) -> Self {
        self.disk_size = true;
        self
    }
}

/// Where an object was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    Cached,
    Loose,
    Packed,
    Alternate,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Cached => "cached",
            Self::Loose => "loose",
            Self::Packed => "packed",
            Self::Alternate => "alternate",
        })
    }
}

/// Result of a successful lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// The id actually read, after replacement.
    pub id: ObjectId,
    pub kind: ObjectType,
    pub size: u64,
    /// Bytes occupied in storage, when requested. Zero for cached objects.
    pub disk_size: Option<u64>,
    /// Content, when requested.
    pub content: Option<Vec<u8>>,
    pub tier: Tier,
}

/// An object held only in memory.
#[derive(Clone, Debug)]
pub(crate) struct CachedObject {
    pub(crate) kind: ObjectKind,
    pub(crate) data: Vec<u8>,
}

impl RepositoryObjectStore {
    /// Find `id` across all tiers.
    ///
    /// Fails with [`StoreError::Missing`] when no tier has the object, or
    /// with a corruption error when the only copies found failed to read.
    pub fn locate(
        &mut self,
        id: &ObjectId,
        flags: ObjectInfoFlags,
        want: InfoRequest,
    ) -> StoreResult<ObjectInfo> {
        let effective = if flags.contains(ObjectInfoFlags::LOOKUP_REPLACE) {
            self.lookup_replace_object(id)?
        } else {
            *id
        };

        if !flags.contains(ObjectInfoFlags::SKIP_CACHE) {
            if let Some(info) = self.locate_cached(&effective, want) {
                trace!(id = %effective, "object found in memory");
                return Ok(info);
            }
        }

        let allow_unknown = flags.contains(ObjectInfoFlags::ALLOW_UNKNOWN_TYPE);
        let quick = flags.contains(ObjectInfoFlags::QUICK);
        let algo = self.algorithm();
        let mut corruption: Option<StoreError> = None;

        match read_loose_object(&self.objects_dir, &effective, want.content, allow_unknown) {
            Ok(Some(loose)) => return Ok(from_loose(effective, loose, Tier::Loose, want)),
            Ok(None) => {}
            Err(e) => note_corruption(&mut corruption, e)?,
        }

        if let Some(info) =
            search_packs(&mut self.packs, &effective, want, Tier::Packed, &mut corruption)?
        {
            return Ok(info);
        }

        self.alternates.ensure_ready();
        for alt in self.alternates.iter_mut() {
            let listed = !quick
                || alt
                    .loose_cache(effective.first_byte(), algo)?
                    .binary_search(&effective)
                    .is_ok();
            if listed {
                let path = alt.loose_object_path(&effective);
                match read_loose_object_at(path, &effective, want.content, allow_unknown) {
                    Ok(Some(loose)) => return Ok(from_loose(effective, loose, Tier::Alternate, want)),
                    Ok(None) => {}
                    Err(e) => note_corruption(&mut corruption, e)?,
                }
            }
            if let Some(info) = search_packs(
                alt.packs_mut(),
                &effective,
                want,
                Tier::Alternate,
                &mut corruption,
            )? {
                return Ok(info);
            }
        }

        if !quick {
            debug!(id = %effective, "object not found, rescanning packs");
            self.packs.reprepare();
            if let Some(info) =
                search_packs(&mut self.packs, &effective, want, Tier::Packed, &mut corruption)?
            {
                return Ok(info);
            }
            for alt in self.alternates.iter_mut() {
                alt.packs_mut().reprepare();
                if let Some(info) = search_packs(
                    alt.packs_mut(),
                    &effective,
                    want,
                    Tier::Alternate,
                    &mut corruption,
                )? {
                    return Ok(info);
                }
            }
        }

        Err(corruption.unwrap_or(StoreError::Missing(effective)))
    }

    fn locate_cached(&self, id: &ObjectId, want: InfoRequest) -> Option<ObjectInfo> {
        if let Some(cached) = self.cached.get(id) {
            return Some(ObjectInfo {
                id: *id,
                kind: ObjectType::Known(cached.kind),
                size: cached.data.len() as u64,
                disk_size: want.disk_size.then_some(0),
                content: want.content.then(|| cached.data.clone()),
                tier: Tier::Cached,
            });
        }
        if want.content || want.disk_size {
            return None;
        }
        let node = self.registry.object(id)?;
        match (node.is_parsed(), node.kind(), node.size()) {
            (true, Some(kind), Some(size)) => Some(ObjectInfo {
                id: *id,
                kind: ObjectType::Known(kind),
                size,
                disk_size: None,
                content: None,
                tier: Tier::Cached,
            }),
            _ => None,
        }
    }
}

/// Remember the first corruption seen; anything else aborts the lookup.
fn note_corruption(slot: &mut Option<StoreError>, err: StoreError) -> StoreResult<()> {
    if err.is_corrupt() {
        debug!(error = %err, "skipping unreadable copy");
        slot.get_or_insert(err);
        Ok(())
    } else {
        Err(err)
    }
}

fn search_packs(
    packs: &mut PackList,
    id: &ObjectId,
    want: InfoRequest,
    tier: Tier,
    corruption: &mut Option<StoreError>,
) -> StoreResult<Option<ObjectInfo>> {
    match packs.find(id, want.content)? {
        PackLookup::Found { header, object, .. } => {
            Ok(Some(from_pack(*id, header, object, tier, want)))
        }
        PackLookup::NotFound { corruption: Some(e) } => {
            note_corruption(corruption, StoreError::Pack(e))?;
            Ok(None)
        }
        PackLookup::NotFound { corruption: None } => Ok(None),
    }
}

fn from_loose(id: ObjectId, loose: LooseObject, tier: Tier, want: InfoRequest) -> ObjectInfo {
    ObjectInfo {
        id,
        kind: loose.kind,
        size: loose.size,
        disk_size: want.disk_size.then_some(loose.disk_size),
        content: loose.data,
        tier,
    }
}

fn from_pack(
    id: ObjectId,
    header: PackedObjectHeader,
    object: Option<PackedObject>,
    tier: Tier,
    want: InfoRequest,
) -> ObjectInfo {
    ObjectInfo {
        id,
        kind: ObjectType::Known(header.kind),
        size: header.size,
        disk_size: want.disk_size.then_some(header.disk_size),
        content: object.map(|o| o.data),
        tier,
    }
}
