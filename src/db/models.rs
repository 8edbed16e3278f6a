use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub bio: Option<String>,
    pub gender: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub created_at: String,
}

// --- Response views (secret fields never present) ---

/// Author identity attached to posts and comments.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Full profile view: social edges as id lists, posts resolved.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub bio: Option<String>,
    pub gender: Option<String>,
    pub avatar_url: Option<String>,
    pub followers: Vec<String>,
    pub following: Vec<String>,
    pub bookmarks: Vec<String>,
    pub posts: Vec<PostView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: String,
    pub caption: String,
    pub image_url: String,
    pub created_at: String,
    pub author: UserSummary,
    pub likes: Vec<String>,
    pub comments: Vec<CommentView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: String,
    pub post_id: String,
    pub text: String,
    pub created_at: String,
    pub author: UserSummary,
}
