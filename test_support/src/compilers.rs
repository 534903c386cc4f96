//! Fake `clang` and `swiftc` executables.
//!
//! The scripts honour just the flags the IR pipeline relies on:
//!
//! - `swiftc` writes every `llvm-bc` path of its `-output-file-map` when
//!   `-emit-bc` is present;
//! - `clang` writes `<stem>-arm64.{bc,i,o}` for each source argument into its
//!   working directory when `-save-temps=cwd` is present.
//!
//! Every invocation appends its arguments to `invocations.log` next to the
//! scripts so tests can assert on the rewritten command lines.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SWIFTC_SCRIPT: &str = r#"
map=""
emit=0
while [ $# -gt 0 ]; do
  case "$1" in
    -output-file-map) shift; map="$1" ;;
    -emit-bc) emit=1 ;;
  esac
  shift
done
[ "$emit" = 1 ] || return 0
[ -n "$map" ] || return 0
sed -n 's/.*"llvm-bc"[[:space:]]*:[[:space:]]*"\([^"]*\)".*/\1/p' "$map" | while IFS= read -r out; do
  mkdir -p "$(dirname "$out")"
  printf 'BC' > "$out"
done
"#;

const CLANG_SCRIPT: &str = r#"
save=0
for arg in "$@"; do
  [ "$arg" = "-save-temps=cwd" ] && save=1
done
[ "$save" = 1 ] || return 0
for arg in "$@"; do
  case "$arg" in
    *.c|*.m|*.mm|*.cpp)
      base=$(basename "$arg")
      stem="${base%.*}"
      printf 'BC' > "$stem-arm64.bc"
      : > "$stem-arm64.i"
      : > "$stem-arm64.o"
      ;;
  esac
done
"#;

/// Write an executable `/bin/sh` script at `path`.
pub fn write_executable(path: &Path, body: &str) {
    let mut file = File::create(path).expect("script");
    writeln!(file, "#!/bin/sh\n{body}").expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("perms");
    }
}

/// A directory holding fake `clang` and `swiftc` executables.
pub struct FakeToolchain {
    dir: TempDir,
}

impl FakeToolchain {
    /// Create both compilers. When `exit_code` is non-zero the compilers
    /// still write their outputs but then fail.
    pub fn new(exit_code: i32) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let log = dir.path().join("invocations.log");
        let record = format!("echo \"$0 $*\" >> '{}'", log.display());
        let finish = format!("exit {exit_code}");
        write_executable(
            &dir.path().join("swiftc"),
            &format!("{record}\ncompile() {{\n{SWIFTC_SCRIPT}\n}}\ncompile \"$@\"\n{finish}"),
        );
        write_executable(
            &dir.path().join("clang"),
            &format!("{record}\ncompile() {{\n{CLANG_SCRIPT}\n}}\ncompile \"$@\"\n{finish}"),
        );
        Self { dir }
    }

    /// Absolute path of the fake `clang`.
    pub fn clang(&self) -> PathBuf {
        self.dir.path().join("clang")
    }

    /// Absolute path of the fake `swiftc`.
    pub fn swiftc(&self) -> PathBuf {
        self.dir.path().join("swiftc")
    }

    /// Every recorded invocation, one line per call.
    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("invocations.log"))
            .map(|text| text.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}
