//! Display-ready views and the optimistic state container behind them.

mod builder;
mod synced;

pub use builder::{
    AuthorSummary, ChallengePage, ChallengeView, CommentView, GoalView, LeaderboardEntry,
    PostPage, PostView, ReactionIndex, ReactionTally, TeamPage, TeamView, ViewBuilder,
    earned_points,
};
pub use synced::{Delta, FetchTicket, Keyed, MutationId, SyncedView};
