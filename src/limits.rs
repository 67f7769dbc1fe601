/// Upper bound on seats per timeslot.
pub const MAX_CAPACITY: u32 = 10_000;

/// Max byte length of a user identifier.
pub const MAX_USER_ID_LEN: usize = 256;

/// Max timeslots held by one store.
pub const MAX_TIMESLOTS: usize = 1_000_000;
