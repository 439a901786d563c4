// Control-plane operations

mod join;

pub use join::{
    already_joined, untaint, JoinMasterConfig, JoinMasterOperation, MASTER_TAINT_EFFECT,
    MASTER_TAINT_KEY,
};
