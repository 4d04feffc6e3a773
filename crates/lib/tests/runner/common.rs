use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cloudbuilder_lib::process::{OutputLine, ProcessCli};
use cloudbuilder_lib::terraform::{Input, Runner, RunnerConfig};
use tokio::sync::mpsc;

/// Imitates the tool's subcommands closely enough for the runner.
///
/// Every invocation is appended to `calls.log` in the working directory.
const FAKE_TERRAFORM: &str = r#"#!/bin/sh
sub=""
for a in "$@"; do
  case "$a" in
    -*) ;;
    *) sub="$a"; break ;;
  esac
done
echo "$sub" >> calls.log

case "$sub" in
  init)
    dir="${TF_DATA_DIR:-.terraform}"
    mkdir -p "$dir"
    echo '{"version": 3}' > "$dir/terraform.tfstate"
    ;;
  plan)
    for a in "$@"; do
      case "$a" in
        -out=*) echo plan > "${a#-out=}" ;;
      esac
    done
    echo "Plan: 1 to add, 0 to change, 0 to destroy."
    ;;
  apply)
    echo "aws_instance.node: Creating..."
    echo "Apply complete! Resources: 1 added, 0 changed, 0 destroyed."
    echo "admin_password = hunter2"
    ;;
  output)
    cat <<'JSON'
{
  "cb_vpn_type": {"sensitive": false, "type": "string", "value": "wireguard"},
  "node_count": {"sensitive": false, "type": "number", "value": 3},
  "subnets": {"sensitive": false, "type": ["list", "string"], "value": ["s-1", "s-2"]}
}
JSON
    ;;
  destroy)
    if [ -z "$TF_VAR_name" ]; then
      echo "variable name is required" >&2
      exit 2
    fi
    ;;
esac
"#;

pub struct Harness {
  pub _temp: tempfile::TempDir,
  pub work_dir: PathBuf,
  pub runner: Runner,
  pub lines: mpsc::UnboundedReceiver<OutputLine>,
}

pub fn write_fake_terraform(dir: &Path) -> PathBuf {
  let path = dir.join("terraform");
  std::fs::write(&path, FAKE_TERRAFORM).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}

pub fn harness() -> Harness {
  let temp = tempfile::TempDir::new().unwrap();
  let exec = write_fake_terraform(temp.path());
  let work_dir = temp.path().join("work");

  let (tx, lines) = mpsc::unbounded_channel();
  let cli = Arc::new(ProcessCli::new(exec, &work_dir).with_sink(tx));
  let inputs = BTreeMap::from([
    ("name".to_string(), Input { optional: false }),
    ("size".to_string(), Input { optional: true }),
  ]);
  let runner = Runner::new(cli, temp.path().join("templates"), None, inputs, RunnerConfig::default());

  Harness {
    _temp: temp,
    work_dir,
    runner,
    lines,
  }
}

/// Invocation log written by the fake tool.
pub fn calls(work_dir: &Path) -> Vec<String> {
  std::fs::read_to_string(work_dir.join("calls.log"))
    .unwrap_or_default()
    .lines()
    .map(str::to_string)
    .collect()
}

pub fn drain(lines: &mut mpsc::UnboundedReceiver<OutputLine>) -> Vec<OutputLine> {
  let mut out = Vec::new();
  while let Ok(line) = lines.try_recv() {
    out.push(line);
  }
  out
}
