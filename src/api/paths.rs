//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

// Dataset identifiers are DOIs and carry slashes, hence the wildcards
pub mod dataset {
    pub const IDS: &str = "/dataset/ids";
    pub const METADATA: &str = "/dataset/metadata/*dataset_id";
    pub const DATA: &str = "/dataset/data/*dataset_id";
    pub const VERIFY: &str = "/dataset/verify/*dataset_id";
    pub const SET_PROJECT_DESCRIPTION: &str = "/dataset/set_project_description/*dataset_id";
    pub const GET_PROJECT_DESCRIPTION: &str = "/dataset/get_project_description/*dataset_id";
}

pub mod network {
    pub const NODES: &str = "/network/nodes";
    pub const BLACKLIST: &str = "/network/multicast/blacklist";
    pub const RECIPIENTS: &str = "/network/multicast/recipients";
}

pub fn drop_leading_slash(path: &str) -> &str {
    if let Some(stripped) = path.strip_prefix('/') {
        stripped
    } else {
        path
    }
}
