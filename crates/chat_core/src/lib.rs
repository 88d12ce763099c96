pub mod accounts;
pub mod broker;
pub mod domain;
pub mod error;
pub mod events;
pub mod fanout;
pub mod messages;
pub mod ports;
pub mod relationships;
pub mod rooms;
pub mod sessions;
pub mod tokens;

pub use accounts::{AuthOutcome, DeviceDetails};
pub use broker::{BrokerConfig, ChatBroker, CreateRoomRequest};
pub use domain::{
    BlockedUser, Friendship, FriendshipStatus, MemberRole, MembershipState, Message, MessageEdit,
    MessageType, NewMessage, Room, RoomMember, RoomSummary, RoomType, ServiceAction, Session,
    SessionContext, User, UserCredentials,
};
pub use error::{ChatError, ChatResult};
pub use events::{BrokerEvent, GroupKey};
pub use fanout::{ConnectionGuard, EventSender, FanoutRouter};
pub use ports::{CredentialHasher, DatabaseService, PortError, PortResult};
pub use rooms::RoomPatch;
