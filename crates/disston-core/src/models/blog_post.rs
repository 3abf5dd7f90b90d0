use serde::{Deserialize, Serialize};

use super::{id_from_string_or_number, Identified};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogPost {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub is_published: bool,
    pub thumbnail_url: Option<String>,
    pub created_at: Option<String>,
}

impl Identified for BlogPost {
    fn id(&self) -> &str {
        &self.id
    }
}

/// `GET /blog-posts` envelope. A missing or null `posts` means no posts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlogPostList {
    #[serde(default)]
    pub posts: Option<Vec<BlogPost>>,
    #[serde(default)]
    pub total: Option<u32>,
}

impl BlogPostList {
    pub fn into_posts(self) -> Vec<BlogPost> {
        self.posts.unwrap_or_default()
    }
}
