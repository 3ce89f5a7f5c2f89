use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use puainstall::InstallError;
use puainstall::character::{CharacterRecord, GeneralCategory};
use puainstall::fs::{FileSystem, MemoryFs};
use puainstall::installer::{InstallOutcome, PuaInstaller};
use puainstall::layout::DataLayout;
use puainstall::log::LogContext;
use puainstall::settings::Settings;
use puainstall::tool::{NormalizationCompiler, ToolExit};
use puainstall::transaction::{TransactionalFileGuard, checkpoint_path, original_path, transaction};

const OVERRIDES: &str = "\
# vendor overrides
E000;VENDOR ONE;Co;0;L;;;;;N;;;;;
E010;VENDOR TWO;Co;0;L;;;;;N;;;;;
";

/// Pops a scripted exit per call; successful runs write a table so there is something to roll back.
struct ScriptedCompiler<'a> {
    fs: &'a MemoryFs,
    exits: RefCell<VecDeque<ToolExit>>,
}

impl<'a> ScriptedCompiler<'a> {
    fn new(fs: &'a MemoryFs, exits: Vec<ToolExit>) -> Self {
        Self { fs, exits: RefCell::new(exits.into()) }
    }
}

impl NormalizationCompiler for ScriptedCompiler<'_> {
    fn compile(&self, output: &Path, inputs: &[PathBuf]) -> io::Result<ToolExit> {
        let exit = self.exits.borrow_mut().pop_front().unwrap_or_else(ToolExit::success);
        if exit.code == Some(0) {
            self.fs.write(output, format!("compiled from {} inputs", inputs.len()).as_bytes())?;
        }
        Ok(exit)
    }
}

fn setup() -> (MemoryFs, DataLayout) {
    let fs = MemoryFs::new();
    let layout = DataLayout::new(&Settings { data_dir: "/icu".into(), ..Settings::default() });
    fs.insert(&layout.overrides, OVERRIDES);
    fs.insert("/icu/nfc.txt", "0300:230\n");
    fs.insert("/icu/nfkc.txt", "FB01>0066 0069\n");
    fs.insert(&layout.canonical_table, "old canonical table");
    fs.insert(&layout.compatibility_table, "old compatibility table");
    (fs, layout)
}

fn records() -> Vec<CharacterRecord> {
    vec![
        CharacterRecord::new(0xE005, "NEW MARK")
            .with_general_category(GeneralCategory::NonspacingMark)
            .with_combining_class(230),
    ]
}

fn snapshot(fs: &MemoryFs) -> Vec<(PathBuf, Vec<u8>)> {
    fs.paths().into_iter().map(|p| (p.clone(), fs.contents(&p).unwrap_or_default())).collect()
}

#[test]
fn tool_failure_leaves_the_database_byte_identical() {
    let (fs, layout) = setup();
    let before = snapshot(&fs);
    let log = LogContext::in_memory();
    let failing = ScriptedCompiler::new(&fs, vec![ToolExit::success(), ToolExit::failed(1, "syntax error")]);
    let result = PuaInstaller::new(&fs, &failing, &layout, &log).install_records(&records(), "custom.xml");
    match result {
        Err(InstallError::ToolFailure { code, stderr }) => {
            assert_eq!(code, Some(1));
            assert_eq!(stderr, "syntax error");
        }
        other => panic!("expected a tool failure, got {other:?}"),
    }
    // no originals, checkpoints or generated inputs are left behind either
    assert_eq!(snapshot(&fs), before);
    assert!(log.contains("Rolling back"));
}

#[test]
fn tool_failure_after_an_earlier_install_restores_that_install() {
    let (fs, layout) = setup();
    let log = LogContext::new();
    let ok = ScriptedCompiler::new(&fs, vec![]);
    PuaInstaller::new(&fs, &ok, &layout, &log).install_records(&records(), "first.xml").expect("install");
    let before = snapshot(&fs);

    let failing = ScriptedCompiler::new(&fs, vec![ToolExit::success(), ToolExit::failed(1, "syntax error")]);
    let result = PuaInstaller::new(&fs, &failing, &layout, &log)
        .install_records(&[CharacterRecord::new(0xE006, "SECOND")], "second.xml");
    assert!(result.is_err());
    assert_eq!(snapshot(&fs), before);
}

#[test]
fn sentinel_exit_rolls_back_and_reports_locked() {
    let (fs, layout) = setup();
    fs.insert("/chars.xml", r#"<PuaDefinitions><CharDef code="E005" data="NEW;Co;0;L;;N;;;;;"/></PuaDefinitions>"#);
    let log = LogContext::new();
    let compiler = ScriptedCompiler::new(&fs, vec![ToolExit::failed(4, "cannot open file")]);
    let outcome = PuaInstaller::new(&fs, &compiler, &layout, &log).run(Path::new("/chars.xml"));
    assert_eq!(outcome, InstallOutcome::Locked);
    assert_eq!(fs.text(&layout.overrides).as_deref(), Some(OVERRIDES));
    assert_eq!(fs.text(&layout.canonical_table).as_deref(), Some("old canonical table"));
    assert!(!fs.paths().iter().any(|p| p.to_string_lossy().contains("_BAK")));
}

#[test]
fn files_created_by_a_failed_run_are_removed_again() {
    let (fs, layout) = setup();
    assert!(!fs.exists(&layout.canonical_overrides));
    let log = LogContext::new();
    let compiler = ScriptedCompiler::new(&fs, vec![ToolExit::failed(2, "")]);
    let result = PuaInstaller::new(&fs, &compiler, &layout, &log).install_records(&records(), "custom.xml");
    assert!(result.is_err());
    assert!(!fs.exists(&layout.canonical_overrides));
    assert!(!fs.exists(&layout.compatibility_overrides));
    assert!(!fs.exists(&checkpoint_path(&layout.canonical_overrides)));
}

#[test]
fn originals_are_taken_once_and_never_overwritten() {
    let (fs, layout) = setup();
    let log = LogContext::new();
    let compiler = ScriptedCompiler::new(&fs, vec![]);
    let installer = PuaInstaller::new(&fs, &compiler, &layout, &log);
    installer.install_records(&records(), "first.xml").expect("first install");
    installer
        .install_records(&[CharacterRecord::new(0xE006, "SECOND")], "second.xml")
        .expect("second install");

    assert_eq!(fs.text(original_path(&layout.overrides)).as_deref(), Some(OVERRIDES));
    assert_eq!(
        fs.text(original_path(&layout.canonical_table)).as_deref(),
        Some("old canonical table")
    );
    // the generated inputs did not exist before the first install
    assert_eq!(fs.len(&original_path(&layout.canonical_overrides)), Some(0));
    let merged = fs.text(&layout.overrides).expect("overrides");
    assert!(merged.contains("E005;NEW MARK;Mn;230;"));
    assert!(merged.contains("E006;SECOND;"));
}

#[test]
fn guard_rolls_back_newest_first() {
    let fs = MemoryFs::new();
    fs.insert("/data/a.txt", "a0");
    let log = LogContext::new();
    let a = Path::new("/data/a.txt");
    let b = Path::new("/data/b.txt");
    let result: puainstall::Result<()> = transaction(&fs, &log, |guard| {
        guard.create_checkpoint(a)?;
        fs.write(a, b"a1").map_err(InstallError::io(a))?;
        guard.create_checkpoint(b)?;
        fs.write(b, b"b1").map_err(InstallError::io(b))?;
        // a second checkpoint of a keeps the first state
        guard.create_checkpoint(a)?;
        fs.write(a, b"a2").map_err(InstallError::io(a))?;
        assert_eq!(guard.undo_log().len(), 2);
        Err(InstallError::Environment("stop".into()))
    });
    assert!(result.is_err());
    assert_eq!(fs.text(a).as_deref(), Some("a0"));
    assert!(!fs.exists(b));
    assert_eq!(fs.paths(), vec![PathBuf::from("/data/a.txt")]);
}

#[test]
fn an_empty_file_survives_rollback() {
    let fs = MemoryFs::new();
    fs.insert("/data/empty.txt", "");
    let log = LogContext::new();
    let path = Path::new("/data/empty.txt");
    let mut guard = TransactionalFileGuard::new(&fs, &log);
    let frame = guard.create_checkpoint(path).expect("checkpoint");
    assert!(!frame.originally_absent);
    fs.write(path, b"filled").expect("write");
    guard.rollback_all();
    assert_eq!(fs.text(path).as_deref(), Some(""));
}

#[test]
fn rollback_keeps_going_past_a_locked_file() {
    let fs = MemoryFs::new();
    fs.insert("/data/a.txt", "a0");
    fs.insert("/data/b.txt", "b0");
    let log = LogContext::in_memory();
    let mut guard = TransactionalFileGuard::new(&fs, &log);
    guard.create_checkpoint(Path::new("/data/a.txt")).expect("checkpoint");
    guard.create_checkpoint(Path::new("/data/b.txt")).expect("checkpoint");
    fs.write(Path::new("/data/a.txt"), b"a1").expect("write");
    fs.write(Path::new("/data/b.txt"), b"b1").expect("write");
    fs.lock("/data/b.txt");
    guard.rollback_all();
    assert_eq!(fs.text("/data/a.txt").as_deref(), Some("a0"));
    assert_eq!(fs.text("/data/b.txt").as_deref(), Some("b1"));
    assert!(log.contains("Could not restore /data/b.txt"));
}

#[test]
fn reset_restores_every_preserved_original() {
    let (fs, layout) = setup();
    let log = LogContext::new();
    let compiler = ScriptedCompiler::new(&fs, vec![]);
    let installer = PuaInstaller::new(&fs, &compiler, &layout, &log);
    installer.install_records(&records(), "custom.xml").expect("install");
    assert_ne!(fs.text(&layout.overrides).as_deref(), Some(OVERRIDES));

    let restored = installer.reset().expect("reset");
    assert_eq!(restored, 5);
    assert_eq!(fs.text(&layout.overrides).as_deref(), Some(OVERRIDES));
    assert!(!fs.exists(&layout.canonical_overrides));
    assert!(!fs.exists(&layout.compatibility_overrides));
    assert_eq!(fs.text(&layout.canonical_table).as_deref(), Some("old canonical table"));
    assert_eq!(fs.text(&layout.compatibility_table).as_deref(), Some("old compatibility table"));
}
