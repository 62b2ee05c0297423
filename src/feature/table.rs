use super::{FeatureDescriptor, FeatureFlags, FeatureId, FeatureType};

/// Features known to this build. The discriminant is the feature's id in
/// the built-in registry.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaFeature {
    AsyncDestroy,
    EmptyBpobj,
    Lz4Compress,
    MultiVdevCrashDump,
    SpacemapHistogram,
    EnabledTxg,
    HoleBirth,
    ExtensibleDataset,
    EmbeddedData,
    Bookmarks,
    FsSsLimit,
    LargeBlocks,
    LargeDnode,
    Sha512,
    Skein,
    Edonr,
    UserobjAccounting,
    Encryption,
    ProjectQuota,
    DeviceRemoval,
    ObsoleteCounts,
    PoolCheckpoint,
    SpacemapV2,
    AllocationClasses,
    ResilverDefer,
    BookmarkV2,
    RedactionBookmarks,
    RedactedDatasets,
    BookmarkWritten,
    LogSpacemap,
    Livelist,
    DeviceRebuild,
    ZstdCompress,
    Draid,
}

impl From<SpaFeature> for FeatureId {
    fn from(feature: SpaFeature) -> FeatureId {
        FeatureId(feature as usize)
    }
}

fn register(
    feature: SpaFeature,
    guid: &str,
    name: &str,
    description: &str,
    flags: FeatureFlags,
    depends: &[SpaFeature],
) -> FeatureDescriptor {
    FeatureDescriptor::new(
        feature.into(),
        guid,
        name,
        description,
        flags,
        depends.iter().map(|&dep| dep.into()).collect(),
    )
}

pub(super) fn builtin_features() -> Vec<FeatureDescriptor> {
    use self::SpaFeature::*;
    let ro = FeatureFlags::READONLY_COMPAT;
    let mos = FeatureFlags::MOS;
    let activate = FeatureFlags::ACTIVATE_ON_ENABLE;
    let per_dataset = FeatureFlags::PER_DATASET;
    let none = FeatureFlags::NONE;

    vec![
        register(
            AsyncDestroy,
            "com.delphix:async_destroy",
            "async_destroy",
            "Destroy filesystems asynchronously.",
            ro,
            &[],
        ),
        register(
            EmptyBpobj,
            "com.delphix:empty_bpobj",
            "empty_bpobj",
            "Snapshots use less space.",
            ro,
            &[],
        ),
        register(
            Lz4Compress,
            "org.illumos:lz4_compress",
            "lz4_compress",
            "LZ4 compression algorithm support.",
            activate,
            &[],
        ),
        register(
            MultiVdevCrashDump,
            "com.joyent:multi_vdev_crash_dump",
            "multi_vdev_crash_dump",
            "Crash dumps to multiple vdev pools.",
            none,
            &[],
        ),
        register(
            SpacemapHistogram,
            "com.delphix:spacemap_histogram",
            "spacemap_histogram",
            "Spacemaps maintain space histograms.",
            ro,
            &[],
        ),
        register(
            EnabledTxg,
            "com.delphix:enabled_txg",
            "enabled_txg",
            "Record txg at which a feature is enabled",
            ro,
            &[],
        ),
        register(
            HoleBirth,
            "com.delphix:hole_birth",
            "hole_birth",
            "Retain hole birth txg for more precise zfs send",
            mos | activate,
            &[EnabledTxg],
        ),
        register(
            ExtensibleDataset,
            "com.delphix:extensible_dataset",
            "extensible_dataset",
            "Enhanced dataset functionality, used by other features.",
            none,
            &[],
        ),
        register(
            EmbeddedData,
            "com.delphix:embedded_data",
            "embedded_data",
            "Blocks which compress very well use even less space.",
            mos | activate,
            &[],
        ),
        register(
            Bookmarks,
            "com.delphix:bookmarks",
            "bookmarks",
            "\"zfs bookmark\" command",
            ro,
            &[ExtensibleDataset],
        ),
        register(
            FsSsLimit,
            "com.joyent:filesystem_limits",
            "filesystem_limits",
            "Filesystem and snapshot limits.",
            ro,
            &[ExtensibleDataset],
        ),
        register(
            LargeBlocks,
            "org.open-zfs:large_blocks",
            "large_blocks",
            "Support for blocks larger than 128KB.",
            per_dataset,
            &[ExtensibleDataset],
        ),
        register(
            LargeDnode,
            "org.zfsonlinux:large_dnode",
            "large_dnode",
            "Variable on-disk size of dnodes.",
            per_dataset,
            &[ExtensibleDataset],
        ),
        register(
            Sha512,
            "org.illumos:sha512",
            "sha512",
            "SHA-512/256 hash algorithm.",
            per_dataset,
            &[ExtensibleDataset],
        ),
        register(
            Skein,
            "org.illumos:skein",
            "skein",
            "Skein hash algorithm.",
            per_dataset,
            &[ExtensibleDataset],
        ),
        register(
            Edonr,
            "org.illumos:edonr",
            "edonr",
            "Edon-R hash algorithm.",
            per_dataset,
            &[ExtensibleDataset],
        ),
        register(
            UserobjAccounting,
            "org.zfsonlinux:userobj_accounting",
            "userobj_accounting",
            "User/Group object accounting.",
            ro | per_dataset,
            &[ExtensibleDataset],
        ),
        register(
            Encryption,
            "com.datto:encryption",
            "encryption",
            "Support for dataset level encryption",
            per_dataset,
            &[ExtensibleDataset, BookmarkV2],
        ),
        register(
            ProjectQuota,
            "org.zfsonlinux:project_quota",
            "project_quota",
            "space/object accounting based on project ID.",
            ro | per_dataset,
            &[ExtensibleDataset],
        ),
        register(
            DeviceRemoval,
            "com.delphix:device_removal",
            "device_removal",
            "Top-level vdevs can be removed, reducing logical pool size.",
            mos,
            &[],
        ),
        register(
            ObsoleteCounts,
            "com.delphix:obsolete_counts",
            "obsolete_counts",
            "Reduce memory used by removed devices when their blocks are freed or remapped.",
            ro,
            &[ExtensibleDataset, DeviceRemoval],
        ),
        register(
            PoolCheckpoint,
            "com.delphix:zpool_checkpoint",
            "zpool_checkpoint",
            "Pool state can be checkpointed, allowing rewind later.",
            ro,
            &[],
        ),
        register(
            SpacemapV2,
            "com.delphix:spacemap_v2",
            "spacemap_v2",
            "Space maps representing large segments are more efficient.",
            ro | activate,
            &[],
        ),
        register(
            AllocationClasses,
            "org.zfsonlinux:allocation_classes",
            "allocation_classes",
            "Support for separate allocation classes.",
            ro,
            &[],
        ),
        register(
            ResilverDefer,
            "com.datto:resilver_defer",
            "resilver_defer",
            "Support for deferring new resilvers when one is already running.",
            ro,
            &[],
        ),
        register(
            BookmarkV2,
            "com.datto:bookmark_v2",
            "bookmark_v2",
            "Support for larger bookmarks",
            none,
            &[ExtensibleDataset, Bookmarks],
        ),
        register(
            RedactionBookmarks,
            "com.delphix:redaction_bookmarks",
            "redaction_bookmarks",
            "Support for bookmarks which store redaction lists for zfs redacted send/recv.",
            none,
            &[BookmarkV2, ExtensibleDataset, Bookmarks],
        ),
        register(
            RedactedDatasets,
            "com.delphix:redacted_datasets",
            "redacted_datasets",
            "Support for redacted datasets, produced by receiving a redacted zfs send stream.",
            per_dataset,
            &[ExtensibleDataset],
        )
        .with_type(FeatureType::Uint64Array),
        register(
            BookmarkWritten,
            "com.delphix:bookmark_written",
            "bookmark_written",
            "Additional accounting, enabling the written#<bookmark> property (space written \
             since a bookmark), and estimates of send stream sizes for incrementals from \
             bookmarks.",
            none,
            &[BookmarkV2, ExtensibleDataset, Bookmarks],
        ),
        register(
            LogSpacemap,
            "com.delphix:log_spacemap",
            "log_spacemap",
            "Log metaslab changes on a single spacemap and flush them periodically.",
            ro,
            &[SpacemapV2],
        ),
        register(
            Livelist,
            "com.delphix:livelist",
            "livelist",
            "Improved clone deletion performance.",
            ro,
            &[ExtensibleDataset],
        ),
        register(
            DeviceRebuild,
            "org.openzfs:device_rebuild",
            "device_rebuild",
            "Support for sequential mirror/dRAID device rebuilds",
            ro,
            &[],
        ),
        register(
            ZstdCompress,
            "org.freebsd:zstd_compress",
            "zstd_compress",
            "zstd compression algorithm support.",
            per_dataset,
            &[ExtensibleDataset],
        ),
        register(
            Draid,
            "org.openzfs:draid",
            "draid",
            "Support for distributed spare RAID",
            mos,
            &[],
        ),
    ]
}
