pub mod client;
pub mod deployment;
pub mod env;
pub mod namespace;
pub mod pod;
pub mod pvc;
pub mod secret;
pub mod service;

pub use client::K8sClient;
pub use deployment::{
    is_volume_empty_dir, link_secret_patch, pvc_name_for_volume, unlink_secret_patch, volume_mounts,
};
pub use env::{find_container, merge_env_vars, parse_env_vars, parse_image_name, remove_env_var, ImageRef};
