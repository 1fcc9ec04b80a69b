//! Typed ID definitions.

use crate::define_id;

define_id!(
    /// Unique per isolate launch; a respawned isolate keeps its name but
    /// gets a fresh UID.
    IsolateUid,
    "iso"
);

define_id!(
    /// Identifies a forker process; one forker runs per node.
    ForkerId,
    "fkr"
);

define_id!(
    /// Handle returned when a listener is registered on the signal bus.
    SubscriptionId,
    "sub"
);
