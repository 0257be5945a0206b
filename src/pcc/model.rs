use serde::Deserialize;
use serde_json::Value;

use crate::model::Article;

/// GraphQL response envelope returned by the content API.
#[derive(Deserialize, Debug)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Deserialize, Debug)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default)]
    pub path: Vec<Value>,
}

#[derive(Deserialize, Debug)]
pub struct ArticleData {
    pub article: Option<Article>,
}

#[derive(Deserialize, Debug)]
pub struct ArticlesData {
    pub articles: Vec<Article>,
}
