//! puainstall – transactional installation of Private Use Area character properties.
//!
//! Applications that define their own characters in the Unicode Private Use
//! Area need the shared Unicode data directory to know about them: their
//! general category, combining class, bidi class, decomposition and so on.
//! The installer takes a file of such definitions and
//! * merges them into the sorted override database (`UnicodeDataOverrides.txt`),
//! * derives the combining-class and decomposition overrides the normalization
//!   compiler reads,
//! * runs the compiler to regenerate the canonical and compatibility tables.
//!
//! Other processes may be using the same data directory while this happens,
//! so the whole run is one transaction. Either every file is updated or every
//! file is put back as it was.
//!
//! ## Modules
//! * [`character`] – [`character::CharacterRecord`] and its closed token sets.
//! * [`store`] – the XML definition file, keyed by code point, first writer wins.
//! * [`merge`] – one-pass merge of sorted definitions into the override database.
//! * [`normalize`] – the compiler's override inputs, derived from the merged database.
//! * [`tool`] – invoking the compiler and classifying how it exited.
//! * [`transaction`] – original/checkpoint artifacts, commit and rollback.
//! * [`cleanup`] – the post-exit agent deleting files that were locked during a run.
//! * [`installer`] – the operations a host calls, ending in an [`installer::InstallOutcome`].
//! * [`fs`], [`layout`], [`settings`], [`log`] – filesystem seam, paths, configuration and the install log.
//!
//! ## Quick Start
//! ```
//! use puainstall::{fs::MemoryFs, layout::DataLayout, log::LogContext, settings::Settings};
//! use puainstall::installer::{InstallOutcome, PuaInstaller};
//! use puainstall::tool::{NormalizationCompiler, ToolExit};
//! use std::path::{Path, PathBuf};
//!
//! struct Succeeds;
//! impl NormalizationCompiler for Succeeds {
//!     fn compile(&self, _: &Path, _: &[PathBuf]) -> std::io::Result<ToolExit> { Ok(ToolExit::success()) }
//! }
//!
//! let fs = MemoryFs::new();
//! fs.insert("/icu/nfc.txt", "");
//! fs.insert("/icu/nfkc.txt", "");
//! fs.insert("/icu/icudt54l/nfc.nrm", "old");
//! fs.insert("/icu/icudt54l/nfkc.nrm", "old");
//! fs.insert("/chars.xml", r#"<PuaDefinitions><CharDef code="F170" data="MY MARK;Mn;230;NSM;;N;;;;;"/></PuaDefinitions>"#);
//!
//! let layout = DataLayout::new(&Settings { data_dir: "/icu".into(), ..Settings::default() });
//! let log = LogContext::new();
//! let installer = PuaInstaller::new(&fs, &Succeeds, &layout, &log);
//! assert_eq!(installer.run(Path::new("/chars.xml")), InstallOutcome::Ok);
//! assert_eq!(fs.text("/icu/nfcOverrides.txt").unwrap().lines().last(), Some("F170:230"));
//! ```
//!
//! ## Locked files
//! A table mapped by another process cannot be deleted. It is renamed out of
//! the way and listed in a manifest; the host then starts a detached cleanup
//! agent that deletes the listed files once the host has exited. If the
//! compiler itself reports a file access error the run is rolled back and
//! reported as [`installer::InstallOutcome::Locked`], so the host can ask the
//! user to close other programs and try again.
//!
//! ## License
//! Dual licensed under Apache-2.0 and MIT (see included `LICENSE.*` files).

pub mod character;
pub mod cleanup;
pub mod error;
pub mod fs;
pub mod installer;
pub mod layout;
pub mod log;
pub mod merge;
pub mod normalize;
pub mod settings;
pub mod store;
pub mod tool;
pub mod transaction;

pub use error::{InstallError, Result};
