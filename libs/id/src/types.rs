//! Identifier types.

use crate::define_id;

define_id!(
    /// Identifies a stored access key. Never the secret token itself.
    KeyId,
    "key"
);

define_id!(
    /// Identifies a registered cluster node.
    NodeId,
    "node"
);

define_id!(
    /// Identifies one live event-stream subscription.
    SubscriberId,
    "sub"
);

define_id!(
    /// Correlates log lines and error bodies for a single HTTP request.
    RequestId,
    "req"
);
