//! xpkg Core - Crossplane package model
//!
//! This crate provides the types shared by the resolver, cache and CLI:
//! - `PackageReference`: a parsed `registry/repo[:tag|@constraint]` string
//! - `Constraint`: semver ranges as written in package metadata
//! - `PackageMeta`: the Provider / Configuration / Function meta document
//! - `Scheme`: explicit registry of decodable object kinds
//! - `ParsedPackage`: one unpacked package version
//! - `Filesystem`: injectable disk or in-memory file access

pub mod error;
pub mod fs;
pub mod lint;
pub mod meta;
pub mod object;
pub mod package;
pub mod parser;
pub mod project;
pub mod reference;
pub mod version;
pub mod xcrd;

pub use error::{CoreError, Result};
pub use fs::{Filesystem, MemFs, OsFs};
pub use meta::{Dependency, MetaDependency, PackageMeta, PackageType, ResolvedDependency};
pub use object::{Decoded, PackageObject, Scheme};
pub use package::ParsedPackage;
pub use parser::PackageDocuments;
pub use project::ProjectMeta;
pub use reference::{Delimiter, PackageReference, VersionConstraint};
pub use version::Constraint;
