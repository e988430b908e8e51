//! API request handlers

pub mod cross_ap;
pub mod federation;
pub mod messages;
pub mod recovery;
pub mod tokens;

pub use cross_ap::{
    initiate_cross_recovery, poll_cross_recovery, release_credentials, submit_cross_response,
};
pub use federation::{discover_peer, federation_info, list_peers, register_peer};
pub use messages::post_message;
pub use recovery::{fetch_recovery, initiate_recovery, release_recovery, respond_recovery};
pub use tokens::issue_token;
