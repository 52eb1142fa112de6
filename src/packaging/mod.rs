//! Artifact packaging.
//!
//! This module turns deployable units with local sources into uploaded
//! archives:
//! - Grouping units by canonical source path
//! - Hashing source trees for content-addressed keys
//! - Archiving with the system `zip` tool
//! - Storing archives and rendered templates in S3

mod archive;
mod hash;
mod packager;
mod s3;

pub use archive::ZipArchiver;
pub use hash::SourceHasher;
pub use packager::{
    Artifact, ArtifactPackager, PackageRequest, artifact_key, plan_packages, template_key,
    unit_locations,
};
pub use s3::S3Packager;

#[cfg(test)]
pub use packager::MockArtifactPackager;
