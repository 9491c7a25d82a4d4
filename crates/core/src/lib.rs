//! Client-side read-model synchronization for EcoLearn.
//!
//! Views are fetched through [`EntityFetcher`], merged by [`ViewBuilder`],
//! kept fresh by a [`LiveView`] driver and changed locally by the
//! [`OptimisticMutator`]. All storage goes through a [`RemoteStore`].

pub mod error;
pub mod fetch;
pub mod listener;
pub mod memory;
pub mod models;
pub mod mutator;
pub mod notice;
pub mod row;
pub mod session;
pub mod source;
pub mod store;
pub mod view;

pub use error::{ErrorClass, SyncError, SyncResult};
pub use fetch::{EntityFetcher, FeedQuery, ParentScope};
pub use listener::{ListenerState, LiveOptions, LiveView};
pub use memory::{MemoryStore, Operation};
pub use models::{
    Challenge, ChallengeCompletion, Goal, ImpactStats, Post, Profile, Reaction, ReactionKind,
    Record, Team, TeamMember, TeamRole,
};
pub use mutator::{MutationOutcome, OptimisticMutator};
pub use notice::{Notice, NoticeLevel, Notifier};
pub use row::{Direction, Filter, Order, Row, Table};
pub use session::{Session, SyncContext};
pub use source::ViewSource;
pub use store::{
    ChannelHandle, InsertEvent, RemoteStore, StoreError, StoreHandle, Subscription, procedures,
};
pub use view::{
    ChallengeView, CommentView, GoalView, Keyed, LeaderboardEntry, PostView, ReactionTally,
    SyncedView, TeamView, ViewBuilder,
};
