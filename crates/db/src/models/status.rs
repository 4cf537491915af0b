//! Status helper enum mapping to the `processing_status` lookup table.
//!
//! Enum discriminants match the seed data order (1-based); the external
//! `code` column is what routine containers and operators see.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Lifecycle status of one dispatch of a processing task.
    ProcessingStatus {
        /// An allocation is running the routine.
        Started = 1,
        /// The routine finished and produced its output.
        Processed = 2,
        /// Queued at the runner, not yet placed.
        Pending = 3,
        /// The routine or its allocation failed.
        InternalError = 4,
        /// An upstream service the routine depends on failed.
        ExternalError = 5,
        /// The error budget is exhausted; the task is closed.
        Terminated = 6,
    }
}

impl ProcessingStatus {
    /// External status code as stored in the `code` column.
    pub fn code(self) -> i16 {
        match self {
            Self::Started => 0,
            Self::Processed => 1,
            Self::Pending => 2,
            Self::InternalError => 110,
            Self::ExternalError => 210,
            Self::Terminated => 99,
        }
    }

    /// Status name as stored in the `name` column.
    pub fn name(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Processed => "processed",
            Self::Pending => "pending",
            Self::InternalError => "internal_error",
            Self::ExternalError => "external_error",
            Self::Terminated => "terminated",
        }
    }

    /// Look a status up by its internal id.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Started),
            2 => Some(Self::Processed),
            3 => Some(Self::Pending),
            4 => Some(Self::InternalError),
            5 => Some(Self::ExternalError),
            6 => Some(Self::Terminated),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ids_match_seed_data() {
        assert_eq!(ProcessingStatus::Started.id(), 1);
        assert_eq!(ProcessingStatus::Processed.id(), 2);
        assert_eq!(ProcessingStatus::Pending.id(), 3);
        assert_eq!(ProcessingStatus::InternalError.id(), 4);
        assert_eq!(ProcessingStatus::ExternalError.id(), 5);
        assert_eq!(ProcessingStatus::Terminated.id(), 6);
    }

    #[test]
    fn external_codes_match_seed_data() {
        assert_eq!(ProcessingStatus::Started.code(), 0);
        assert_eq!(ProcessingStatus::Processed.code(), 1);
        assert_eq!(ProcessingStatus::Pending.code(), 2);
        assert_eq!(ProcessingStatus::InternalError.code(), 110);
        assert_eq!(ProcessingStatus::ExternalError.code(), 210);
        assert_eq!(ProcessingStatus::Terminated.code(), 99);
    }

    #[test]
    fn from_id_round_trips() {
        for id in 1..=6 {
            let status = ProcessingStatus::from_id(id).expect("seeded id");
            assert_eq!(status.id(), id);
        }
        assert!(ProcessingStatus::from_id(7).is_none());
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = ProcessingStatus::Processed.into();
        assert_eq!(id, 2);
    }
}
