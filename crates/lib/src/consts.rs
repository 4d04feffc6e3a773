//! Well-known names shared across the crate.

/// Application name used for platform directories.
pub const APP_NAME: &str = "cloudbuilder";

/// Prefix terraform uses to read input variables from the environment.
pub const TF_VAR_PREFIX: &str = "TF_VAR_";

/// Environment variable that relocates terraform's internal data directory.
pub const TF_DATA_DIR_ENV: &str = "TF_DATA_DIR";

/// Terraform's internal data directory name within a working directory.
pub const TF_DATA_DIR_NAME: &str = ".terraform";

/// Local state marker written by `terraform init` inside the data directory.
pub const TF_STATE_FILENAME: &str = "terraform.tfstate";

/// Plan artifact written by `plan` and consumed by `apply`.
pub const TF_PLAN_FILENAME: &str = "tf.plan";

/// Marker terraform prints once an apply has finished.
pub const APPLY_COMPLETE_MARKER: &str = "Apply complete!";

/// Output holding the list of managed instance metadata records.
///
/// Also the reserved prefix: outputs starting with it are never forwarded
/// to dependent targets.
pub const MANAGED_INSTANCES_OUTPUT: &str = "cb_managed_instances";

pub const DEPLOYMENT_DESCRIPTION_OUTPUT: &str = "cb_deployment_description";
pub const DEPLOYMENT_VERSION_OUTPUT: &str = "cb_deployment_version";
pub const ROOT_CA_CERT_OUTPUT: &str = "cb_root_ca_cert";
pub const VPN_TYPE_OUTPUT: &str = "cb_vpn_type";

/// Environment override for the external tool invocation timeout.
pub const EXEC_TIMEOUT_ENV: &str = "CLOUDBUILDER_EXEC_TIMEOUT_SECS";

/// Environment override for the background refresh timeout.
pub const REFRESH_TIMEOUT_ENV: &str = "CLOUDBUILDER_REFRESH_TIMEOUT_SECS";
