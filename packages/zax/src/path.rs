//! Path types tailored to `zax`.
//!
//! The core invariant of the artifact store is that every persisted path is
//! workspace-root-relative, while every path handed to the operating system
//! is absolute. Rather than policing that distinction by convention, these
//! types carry it in the type system: an [`AbsDirPath`] cannot be confused
//! with a [`RelFilePath`], and converting between them goes through explicit,
//! validated operations.
//!
//! Paths are stored exactly as provided; no normalization is performed. The
//! platform branch of this tool is Unix-only, so "absolute" means "starts
//! with `/`".

use std::{
    borrow::Cow,
    ffi::OsStr,
    marker::PhantomData,
    path::{Path, PathBuf},
    str::FromStr,
};

use color_eyre::{
    Report, Result,
    eyre::{Context, bail},
};
use derive_more::Display;
use duplicate::{duplicate, duplicate_item};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tap::Pipe;

use crate::fs;

pub type RelFilePath = TypedPath<Rel, File>;
pub type RelDirPath = TypedPath<Rel, Dir>;
pub type AbsFilePath = TypedPath<Abs, File>;
pub type AbsDirPath = TypedPath<Abs, Dir>;

/// Make an instance of a [`RelFilePath`] with compile-time validation.
#[macro_export]
macro_rules! mk_rel_file {
    ($path:literal) => {{
        $crate::assert_relative!($path);
        $crate::path::RelFilePath::try_from($path).unwrap()
    }};
}

/// Make an instance of a [`RelDirPath`] with compile-time validation.
#[macro_export]
macro_rules! mk_rel_dir {
    ($path:literal) => {{
        $crate::assert_relative!($path);
        $crate::path::RelDirPath::try_from($path).unwrap()
    }};
}

/// Assert that the string provided indicates a relative path.
#[doc(hidden)]
#[macro_export]
macro_rules! assert_relative {
    ($path:literal) => {{
        const _: () = {
            assert!(!const_str::starts_with!($path, '/'), "path is not relative");
        };
    }};
}

/// An absolute path begins at the filesystem root.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Abs;

/// A relative path describes steps from an unstated base directory.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Rel;

/// A directory contains other filesystem entities.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Dir;

/// A file contains data.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct File;

/// A location on the filesystem according to the type modifiers.
///
/// This type is about _intent_ within the working program; it does not
/// validate that the named resource exists or has the stated type. Validating
/// up front is both racy and makes it awkward to name resources that don't
/// exist yet, so the only checked property is the `Abs`/`Rel` distinction.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display)]
#[display("{}", self.inner.display())]
pub struct TypedPath<Base, Type> {
    base: PhantomData<Base>,
    ty: PhantomData<Type>,
    inner: PathBuf,
}

impl<B, T> TypedPath<B, T> {
    /// View the path as a standard path.
    pub fn as_std_path(&self) -> &Path {
        &self.inner
    }

    /// View the path as an OS string.
    pub fn as_os_str(&self) -> &OsStr {
        self.inner.as_os_str()
    }

    /// View the path as a lossily-converted string.
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        self.inner.to_string_lossy()
    }

    /// The final component of the path, if there is one.
    pub fn file_name(&self) -> Option<&OsStr> {
        self.inner.file_name()
    }

    /// Get the parent of the provided path, if one exists.
    ///
    /// Unlike the standard library, this returns `None` for the parent of a
    /// single-component relative path.
    pub fn parent(&self) -> Option<TypedPath<B, Dir>> {
        self.inner
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(ToOwned::to_owned)
            .map(TypedPath::new_unchecked)
    }

    fn new_unchecked(inner: impl Into<PathBuf>) -> Self {
        Self {
            base: PhantomData,
            ty: PhantomData,
            inner: inner.into(),
        }
    }
}

#[duplicate_item(
    ty_from;
    [ PathBuf ];
    [ &PathBuf ];
    [ &Path ];
    [ String ];
    [ &String ];
    [ &str ];
)]
impl<B: Validator, T: Validator> TryFrom<ty_from> for TypedPath<B, T> {
    type Error = Report;

    fn try_from(value: ty_from) -> Result<Self, Self::Error> {
        #[allow(
            clippy::useless_conversion,
            reason = "This is only useless for one branch of the macro (i.e. PathBuf)"
        )]
        let value = PathBuf::from(value);
        B::validate(&value)?;
        T::validate(&value)?;
        Ok(Self::new_unchecked(value))
    }
}

impl<B: Validator, T: Validator> FromStr for TypedPath<B, T> {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl<B, T> AsRef<TypedPath<B, T>> for TypedPath<B, T> {
    fn as_ref(&self) -> &TypedPath<B, T> {
        self
    }
}

impl<B, T> From<TypedPath<B, T>> for PathBuf {
    fn from(value: TypedPath<B, T>) -> Self {
        value.inner
    }
}

impl<B, T> From<&TypedPath<B, T>> for PathBuf {
    fn from(value: &TypedPath<B, T>) -> Self {
        value.inner.clone()
    }
}

impl AbsDirPath {
    /// Get the current working directory for the process.
    pub fn current() -> Result<AbsDirPath> {
        let cwd = std::env::current_dir().context("get current dir")?;
        Self::try_from(cwd).context("convert")
    }

    /// Report whether `other` is this directory or inside it.
    pub fn contains<T>(&self, other: &TypedPath<Abs, T>) -> bool {
        other.inner.starts_with(&self.inner)
    }
}

impl<'de, B: Validator, T: Validator> Deserialize<'de> for TypedPath<B, T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let p = PathBuf::deserialize(deserializer)?;
        Self::try_from(p).map_err(serde::de::Error::custom)
    }
}

impl<B, T> Serialize for TypedPath<B, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.inner.serialize(serializer)
    }
}

impl<B, T> std::fmt::Debug for TypedPath<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.inner)
    }
}

#[duplicate_item(
    ty method;
    [ File ] [ fs::is_file ];
    [ Dir ] [ fs::is_dir ];
)]
impl<B> TypedPath<B, ty> {
    /// Report whether the item exists on disk with the expected type.
    ///
    /// Like any such probe this is susceptible to time-of-check/time-of-use
    /// races; callers still handle errors at the point of use.
    pub async fn exists(&self) -> bool {
        method(self.as_std_path()).await
    }
}

/// Functionality for making a path relative using a base path.
pub trait RelativeTo<Other> {
    type Output;

    /// Make `self` relative to `other` if possible.
    fn relative_to(&self, other: Other) -> Self::Output;
}

duplicate! {
    [
        ty_other;
        [ TypedPath<Abs, Dir> ];
        [ &TypedPath<Abs, Dir> ];
    ]
    #[duplicate_item(
        ty_self ty_output;
        [ TypedPath<Abs, Dir> ] [ TypedPath<Rel, Dir> ];
        [ TypedPath<Abs, File> ] [ TypedPath<Rel, File> ];
        [ &TypedPath<Abs, Dir> ] [ TypedPath<Rel, Dir> ];
        [ &TypedPath<Abs, File> ] [ TypedPath<Rel, File> ];
    )]
    impl RelativeTo<ty_other> for ty_self {
        type Output = Result<ty_output>;

        fn relative_to(&self, other: ty_other) -> Self::Output {
            self.inner
                .strip_prefix(&other.inner)
                .with_context(|| format!("make {:?} relative to {:?}", self.inner, other.inner))
                .and_then(TypedPath::try_from)
        }
    }
}

/// Creates and joins a path from string input, validating the result.
pub trait TryJoinWith {
    /// Join `dir` to `self` as a directory.
    fn try_join_dir(&self, dir: impl AsRef<str>) -> Result<AbsDirPath>;

    /// Join `file` to `self` as a file.
    fn try_join_file(&self, file: impl AsRef<str>) -> Result<AbsFilePath>;
}

impl TryJoinWith for AbsDirPath {
    fn try_join_dir(&self, other: impl AsRef<str>) -> Result<AbsDirPath> {
        self.inner.join(other.as_ref()).pipe(AbsDirPath::try_from)
    }

    fn try_join_file(&self, other: impl AsRef<str>) -> Result<AbsFilePath> {
        self.inner.join(other.as_ref()).pipe(AbsFilePath::try_from)
    }
}

/// Infallibly joins known valid paths together.
pub trait JoinWith<Other> {
    type Output;

    /// Join `other` to `self`.
    fn join(&self, other: Other) -> Self::Output;
}

#[duplicate_item(
    ty_other ty_output;
    [ TypedPath<Rel, Dir> ] [ TypedPath<Abs, Dir> ];
    [ &TypedPath<Rel, Dir> ] [ TypedPath<Abs, Dir> ];
    [ TypedPath<Rel, File> ] [ TypedPath<Abs, File> ];
    [ &TypedPath<Rel, File> ] [ TypedPath<Abs, File> ];
)]
impl JoinWith<ty_other> for AbsDirPath {
    type Output = ty_output;

    fn join(&self, other: ty_other) -> Self::Output {
        self.as_std_path()
            .join(other.as_std_path())
            .pipe(TypedPath::new_unchecked)
    }
}

/// Validation powering the fallible constructors.
pub trait Validator {
    fn validate(path: &Path) -> Result<()>;
}

impl Validator for Rel {
    fn validate(path: &Path) -> Result<()> {
        if !path.is_relative() {
            bail!("path is not relative: {path:?}");
        }
        Ok(())
    }
}

impl Validator for Abs {
    fn validate(path: &Path) -> Result<()> {
        if !path.is_absolute() {
            bail!("path is not absolute: {path:?}");
        }
        Ok(())
    }
}

#[duplicate_item(
    ty_self;
    [ Dir ];
    [ File ];
)]
impl Validator for ty_self {
    fn validate(_: &Path) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    #[test]
    fn absolute_paths_reject_relative_input() {
        assert!(AbsDirPath::try_from("relative/path").is_err());
        assert!(AbsDirPath::try_from("/absolute/path").is_ok());
    }

    #[test]
    fn relative_paths_reject_absolute_input() {
        assert!(RelFilePath::try_from("/absolute/file").is_err());
        assert!(RelFilePath::try_from("relative/file").is_ok());
    }

    #[test]
    fn join_produces_absolute_paths() {
        let dir = AbsDirPath::try_from("/workspace").unwrap();
        let file = dir.join(mk_rel_file!("artifacts/vitest.json"));
        pretty_assert_eq!(
            file.as_std_path(),
            Path::new("/workspace/artifacts/vitest.json")
        );
    }

    #[test]
    fn relative_to_strips_the_base() {
        let root = AbsDirPath::try_from("/workspace").unwrap();
        let file = AbsFilePath::try_from("/workspace/src/app.ts").unwrap();
        let rel = file.relative_to(&root).unwrap();
        pretty_assert_eq!(rel.as_std_path(), Path::new("src/app.ts"));
    }

    #[test]
    fn relative_to_rejects_foreign_paths() {
        let root = AbsDirPath::try_from("/workspace").unwrap();
        let file = AbsFilePath::try_from("/elsewhere/app.ts").unwrap();
        assert!(file.relative_to(&root).is_err());
    }

    #[test]
    fn contains_is_prefix_based() {
        let root = AbsDirPath::try_from("/workspace").unwrap();
        let inside = AbsFilePath::try_from("/workspace/a/b.ts").unwrap();
        let outside = AbsFilePath::try_from("/other/b.ts").unwrap();
        assert!(root.contains(&inside));
        assert!(!root.contains(&outside));
    }

    #[test]
    fn parent_of_single_component_relative_path_is_none() {
        let file = RelFilePath::try_from("file.ts").unwrap();
        assert!(file.parent().is_none());
    }
}
