use std::collections::BTreeMap;

use cloudbuilder_lib::process::{CliError, OutputLine};
use cloudbuilder_lib::terraform::{OutputValue, RunnerError};
use serde_json::json;

use super::common::{calls, drain, harness};

fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
  pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[tokio::test]
async fn init_apply_and_decode_outputs() {
  let mut h = harness();
  let data_dir = h.work_dir.join(".terraform");
  let data_env = data_dir.display().to_string();
  h.runner.set_env(vars(&[("TF_DATA_DIR", data_env.as_str())]));

  h.runner.init().await.unwrap();
  assert!(data_dir.join("terraform.tfstate").exists());

  let outputs = h.runner.apply(&vars(&[("name", "web")])).await.unwrap();
  assert_eq!(calls(&h.work_dir), vec!["init", "plan", "apply", "output"]);
  assert!(!h.runner.plan_path().exists());

  assert_eq!(outputs["cb_vpn_type"].value, OutputValue::Text("wireguard".into()));
  assert_eq!(outputs["node_count"].value.to_var_string(), "3");
  assert_eq!(
    outputs["subnets"].value,
    OutputValue::Structured(json!(["s-1", "s-2"]))
  );
}

#[tokio::test]
async fn apply_output_is_cut_after_completion_marker() {
  let mut h = harness();
  h.runner.apply(&vars(&[("name", "web")])).await.unwrap();

  let shown: Vec<String> = drain(&mut h.lines)
    .into_iter()
    .filter_map(|line| match line {
      OutputLine::Stdout(text) => Some(text),
      OutputLine::Stderr(_) => None,
    })
    .collect();

  assert!(shown.iter().any(|l| l.starts_with("Plan: 1 to add")));
  assert!(shown.iter().any(|l| l.starts_with("Apply complete!")));
  assert!(!shown.iter().any(|l| l.contains("hunter2")));
  // the decoded output stream is never displayed
  assert!(!shown.iter().any(|l| l.contains("wireguard")));
}

#[tokio::test]
async fn missing_required_variable_never_runs_the_tool() {
  let h = harness();
  let err = h.runner.plan(&vars(&[("size", "large")])).await.unwrap_err();
  assert!(matches!(err, RunnerError::MissingArguments(ref names) if names == &["name".to_string()]));
  assert!(calls(&h.work_dir).is_empty());
}

#[tokio::test]
async fn failed_destroy_carries_exit_code_and_stderr() {
  let mut h = harness();
  let err = h.runner.destroy().await.unwrap_err();
  match err {
    RunnerError::Cli(CliError::Failed { code, stderr, .. }) => {
      assert_eq!(code, Some(2));
      assert!(stderr.contains("variable name is required"));
    }
    other => panic!("unexpected error: {other}"),
  }

  h.runner.add_to_env(vars(&[("TF_VAR_name", "web")]));
  h.runner.destroy().await.unwrap();
  assert_eq!(calls(&h.work_dir), vec!["destroy", "destroy"]);
  assert!(
    drain(&mut h.lines)
      .iter()
      .any(|l| matches!(l, OutputLine::Stderr(text) if text.contains("variable name is required")))
  );
}
