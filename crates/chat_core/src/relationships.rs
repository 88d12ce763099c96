//! crates/chat_core/src/relationships.rs
//!
//! Friendship and block-list rules. The message pipeline and room engine
//! consult [`RelationshipGate::ensure_not_blocked`] before letting two users
//! interact directly.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{BlockedUser, Friendship, FriendshipStatus};
use crate::error::{ChatError, ChatResult};
use crate::ports::DatabaseService;

/// Which side of a pair holds a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    None,
    /// The acting user blocked the other one.
    BlockedByMe,
    /// The other user blocked the acting user.
    BlockedByThem,
}

#[derive(Clone)]
pub struct RelationshipGate {
    db: Arc<dyn DatabaseService>,
}

impl RelationshipGate {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    pub async fn block_state(&self, me: Uuid, other: Uuid) -> ChatResult<BlockState> {
        if self.db.is_blocked(me, other).await? {
            return Ok(BlockState::BlockedByMe);
        }
        if self.db.is_blocked(other, me).await? {
            return Ok(BlockState::BlockedByThem);
        }
        Ok(BlockState::None)
    }

    /// Fails with a `Forbidden` whose message names the block, so clients can
    /// tell it apart from a plain authorization failure.
    pub async fn ensure_not_blocked(&self, me: Uuid, other: Uuid) -> ChatResult<()> {
        match self.block_state(me, other).await? {
            BlockState::None => Ok(()),
            BlockState::BlockedByMe => Err(ChatError::forbidden(
                "You have blocked this user; unblock them to interact",
            )),
            BlockState::BlockedByThem => Err(ChatError::forbidden("You are blocked by this user")),
        }
    }

    //=====================================================================================
    // Friendships
    //=====================================================================================

    pub async fn send_friend_request(&self, from: Uuid, to: Uuid) -> ChatResult<Friendship> {
        if from == to {
            return Err(ChatError::validation("Cannot befriend yourself"));
        }
        self.db.get_user(to).await?;
        self.ensure_not_blocked(from, to).await?;

        let now = Utc::now();
        let existing = self.db.get_friendship(from, to).await?;
        let friendship = match existing {
            Some(existing) => match (existing.status, existing.initiator_user_id == from) {
                (FriendshipStatus::Accepted, _) => {
                    return Err(ChatError::validation("Already friends"));
                }
                (FriendshipStatus::Pending, true) => {
                    return Err(ChatError::validation("Friend request already sent"));
                }
                // The other side already asked: sending back accepts it.
                (FriendshipStatus::Pending, false) => Friendship {
                    status: FriendshipStatus::Accepted,
                    updated_at: now,
                    ..existing
                },
                (FriendshipStatus::Rejected, _) => Friendship {
                    status: FriendshipStatus::Pending,
                    initiator_user_id: from,
                    updated_at: now,
                    ..existing
                },
            },
            None => {
                let (user_low, user_high) = Friendship::canonical_pair(from, to);
                Friendship {
                    id: Uuid::new_v4(),
                    user_low,
                    user_high,
                    status: FriendshipStatus::Pending,
                    initiator_user_id: from,
                    created_at: now,
                    updated_at: now,
                }
            }
        };
        self.db.save_friendship(&friendship).await?;
        info!(from = %from, to = %to, status = %friendship.status, "friend request saved");
        Ok(friendship)
    }

    /// Answers a pending request that `requester` sent to `me`.
    pub async fn respond_friend_request(
        &self,
        me: Uuid,
        requester: Uuid,
        accept: bool,
    ) -> ChatResult<Friendship> {
        let existing = self
            .db
            .get_friendship(me, requester)
            .await?
            .filter(|f| f.status == FriendshipStatus::Pending && f.initiator_user_id == requester)
            .ok_or_else(|| ChatError::not_found("No pending friend request from this user"))?;

        let friendship = Friendship {
            status: if accept {
                FriendshipStatus::Accepted
            } else {
                FriendshipStatus::Rejected
            },
            updated_at: Utc::now(),
            ..existing
        };
        self.db.save_friendship(&friendship).await?;
        Ok(friendship)
    }

    pub async fn remove_friend(&self, me: Uuid, other: Uuid) -> ChatResult<()> {
        if !self.db.delete_friendship(me, other).await? {
            return Err(ChatError::not_found("Friendship not found"));
        }
        Ok(())
    }

    pub async fn friends(&self, me: Uuid) -> ChatResult<Vec<Uuid>> {
        Ok(self
            .db
            .list_friendships(me)
            .await?
            .into_iter()
            .filter(|f| f.status == FriendshipStatus::Accepted)
            .map(|f| f.other(me))
            .collect())
    }

    /// Users who have a pending request addressed to `me`.
    pub async fn pending_requests(&self, me: Uuid) -> ChatResult<Vec<Uuid>> {
        Ok(self
            .db
            .list_friendships(me)
            .await?
            .into_iter()
            .filter(|f| f.status == FriendshipStatus::Pending && f.initiator_user_id != me)
            .map(|f| f.initiator_user_id)
            .collect())
    }

    //=====================================================================================
    // Blocking
    //=====================================================================================

    /// Blocks `other` and drops any friendship between the two.
    pub async fn block(&self, me: Uuid, other: Uuid) -> ChatResult<()> {
        if me == other {
            return Err(ChatError::validation("Cannot block yourself"));
        }
        self.db.get_user(other).await?;
        self.db.block_user(me, other, Utc::now()).await?;
        self.db.delete_friendship(me, other).await?;
        info!(blocker = %me, blocked = %other, "user blocked");
        Ok(())
    }

    pub async fn unblock(&self, me: Uuid, other: Uuid) -> ChatResult<()> {
        if !self.db.unblock_user(me, other).await? {
            return Err(ChatError::not_found("User is not blocked"));
        }
        info!(blocker = %me, blocked = %other, "user unblocked");
        Ok(())
    }

    pub async fn blocked_by(&self, me: Uuid) -> ChatResult<Vec<BlockedUser>> {
        Ok(self.db.list_blocked(me).await?)
    }
}
