pub mod builder;
pub mod model;
pub mod uri;

pub use builder::{
    build_credential_pairs, build_tasks, expand_service_spec, expand_target, parse_combo_line,
    parse_option_spec, CredentialPair, ServiceSpec, TargetSpec, TaskBuilder,
};
pub use model::{format_host, Options, TargetIdentity, Task};
pub use uri::{parse_uri, split_values, UriComponents};
