use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};

use puainstall::InstallError;
use puainstall::fs::{FileSystem, MemoryFs};
use puainstall::installer::{InstallOutcome, PuaInstaller};
use puainstall::layout::DataLayout;
use puainstall::log::LogContext;
use puainstall::settings::Settings;
use puainstall::store::CustomCharacterStore;
use puainstall::tool::{NormalizationCompiler, ToolExit};

/// Records every invocation and writes a table listing its inputs.
struct Recording<'a> {
    fs: &'a MemoryFs,
    calls: RefCell<Vec<(PathBuf, Vec<PathBuf>)>>,
}

impl NormalizationCompiler for Recording<'_> {
    fn compile(&self, output: &Path, inputs: &[PathBuf]) -> io::Result<ToolExit> {
        self.calls.borrow_mut().push((output.to_path_buf(), inputs.to_vec()));
        self.fs.write(output, format!("{inputs:?}").as_bytes())?;
        Ok(ToolExit::success())
    }
}

fn setup() -> (MemoryFs, DataLayout) {
    let fs = MemoryFs::new();
    let settings = Settings { data_dir: "/icu".into(), ..Settings::default() };
    let layout = DataLayout::new(&settings);
    fs.insert("/icu/nfc.txt", "");
    fs.insert("/icu/nfkc.txt", "");
    fs.insert(
        &layout.overrides,
        "# overrides\nE000;VENDOR;Co;0;L;;;;;N;;;;;\nF000;VENDOR MARK;Mn;220;NSM;;;;;N;;;;;\n",
    );
    fs.create_dir_all(&layout.table_dir).expect("table dir");
    (fs, layout)
}

const DEFINITIONS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<PuaDefinitions>
  <CharDef code="F000" data="MY MARK;Mn;230;NSM;;N;;;;;" />
  <CharDef code="F001" data="MY LIGATURE;Lo;0;L;&lt;compat&gt; 0066 0069;N;;;;;" />
  <CharDef code="E800" data="MY DIGIT;Nd;0;L;;N;Decimal;3;;;" />
</PuaDefinitions>
"#;

#[test]
fn install_merges_generates_and_compiles() {
    let (fs, layout) = setup();
    fs.insert("/home/custom.xml", DEFINITIONS);
    let log = LogContext::in_memory();
    let compiler = Recording { fs: &fs, calls: RefCell::new(Vec::new()) };
    let summary = PuaInstaller::new(&fs, &compiler, &layout, &log)
        .install_file(Path::new("/home/custom.xml"))
        .expect("install");

    assert_eq!(summary.definitions, 3);
    assert_eq!(summary.merge.inserted, 3);
    assert_eq!(summary.merge.replaced, 1);
    assert_eq!(summary.merge.copied, 1);

    let merged = fs.text(&layout.overrides).expect("overrides");
    let data: Vec<&str> = merged.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(data.len(), 4);
    assert!(data[0].starts_with("E000;VENDOR;"));
    assert!(data[1].starts_with("E800;MY DIGIT;Nd;0;L;;3;3;3;N;"));
    assert!(data[2].starts_with("F000;MY MARK;Mn;230;NSM;"));
    assert!(data[2].contains("custom.xml User Added"));
    assert!(data[3].starts_with("F001;MY LIGATURE;Lo;0;L;<compat> 0066 0069;"));

    let canonical = fs.text(&layout.canonical_overrides).expect("canonical");
    assert_eq!(canonical.lines().filter(|l| !l.starts_with('#')).collect::<Vec<_>>(), vec!["F000:230"]);
    let compatibility = fs.text(&layout.compatibility_overrides).expect("compatibility");
    assert!(compatibility.lines().any(|l| l == "F001>0066 0069"));

    let calls = compiler.calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], (layout.canonical_table.clone(), layout.canonical_inputs()));
    assert_eq!(calls[1], (layout.compatibility_table.clone(), layout.compatibility_inputs()));
    assert_eq!(
        calls[1].1.last().map(PathBuf::as_path),
        Some(layout.compatibility_overrides.as_path())
    );
    assert!(!fs.paths().iter().any(|p| p.to_string_lossy().contains("_BAK")));
}

#[test]
fn missing_data_directory_is_fatal_before_anything_changes() {
    let fs = MemoryFs::new();
    fs.insert("/home/custom.xml", DEFINITIONS);
    let layout = DataLayout::new(&Settings { data_dir: "/nowhere".into(), ..Settings::default() });
    let log = LogContext::new();
    let compiler = Recording { fs: &fs, calls: RefCell::new(Vec::new()) };
    let installer = PuaInstaller::new(&fs, &compiler, &layout, &log);
    assert!(matches!(
        installer.install_file(Path::new("/home/custom.xml")),
        Err(InstallError::Environment(_))
    ));
    assert!(matches!(installer.run(Path::new("/home/custom.xml")), InstallOutcome::Fatal(_)));
    assert_eq!(fs.paths(), vec![PathBuf::from("/home/custom.xml")]);
}

#[test]
fn malformed_definition_file_is_fatal() {
    let (fs, layout) = setup();
    fs.insert("/home/broken.xml", "<PuaDefinitions><CharDef code=\"F000\"");
    let log = LogContext::new();
    let compiler = Recording { fs: &fs, calls: RefCell::new(Vec::new()) };
    let outcome = PuaInstaller::new(&fs, &compiler, &layout, &log).run(Path::new("/home/broken.xml"));
    assert!(matches!(outcome, InstallOutcome::Fatal(_)));
    assert!(compiler.calls.borrow().is_empty());
}

#[test]
fn migrate_folds_legacy_files_under_the_target() {
    let (fs, layout) = setup();
    fs.insert(
        "/home/target.xml",
        r#"<PuaDefinitions><CharDef code="F000" data="TARGET;Mn;230;NSM;;N;;;;;"/></PuaDefinitions>"#,
    );
    fs.insert(
        "/home/legacy1.xml",
        r#"<PuaDefinitions><CharDef code="F000" data="LEGACY ONE;Lo;0;L;;N;;;;;"/><CharDef code="F002" data="LEGACY TWO;Lo;0;L;;N;;;;;"/></PuaDefinitions>"#,
    );
    fs.insert(
        "/home/legacy2.xml",
        r#"<PuaDefinitions><CharDef code="F002" data="LATER;Lo;0;L;;N;;;;;"/></PuaDefinitions>"#,
    );
    let log = LogContext::new();
    let compiler = Recording { fs: &fs, calls: RefCell::new(Vec::new()) };
    let summary = PuaInstaller::new(&fs, &compiler, &layout, &log)
        .migrate(
            &[PathBuf::from("/home/legacy1.xml"), PathBuf::from("/home/legacy2.xml")],
            Path::new("/home/target.xml"),
        )
        .expect("migrate");
    assert_eq!(summary.definitions, 2);

    let bytes = fs.contents("/home/target.xml").expect("target");
    let target = CustomCharacterStore::from_reader(bytes.as_slice(), &log).expect("parse");
    assert_eq!(target.get(0xF000).expect("F000").name(), "TARGET");
    assert_eq!(target.get(0xF002).expect("F002").name(), "LEGACY TWO");
    assert!(fs.text(&layout.overrides).expect("overrides").contains("F002;LEGACY TWO;"));
}

#[test]
fn failed_migration_leaves_the_target_alone() {
    let (fs, layout) = setup();
    let target = r#"<PuaDefinitions><CharDef code="F000" data="TARGET;Mn;230;NSM;;N;;;;;"/></PuaDefinitions>"#;
    fs.insert("/home/target.xml", target);
    fs.insert(
        "/home/legacy.xml",
        r#"<PuaDefinitions><CharDef code="F005" data="OLD;Lo;0;L;;N;;;;;"/></PuaDefinitions>"#,
    );
    struct Fails;
    impl NormalizationCompiler for Fails {
        fn compile(&self, _: &Path, _: &[PathBuf]) -> io::Result<ToolExit> {
            Ok(ToolExit::failed(1, "broken"))
        }
    }
    let log = LogContext::new();
    let result = PuaInstaller::new(&fs, &Fails, &layout, &log)
        .migrate(&[PathBuf::from("/home/legacy.xml")], Path::new("/home/target.xml"));
    assert!(matches!(result, Err(InstallError::ToolFailure { .. })));
    assert_eq!(fs.text("/home/target.xml").as_deref(), Some(target));
}
