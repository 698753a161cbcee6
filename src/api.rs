use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::core::FeedForge;
use crate::export::ExportFormat;
use crate::task::{BatchTaskSpec, TimeWindow};

/// Uniform failure envelope: every handler answers 200 with success=false
/// rather than surfacing transport-level errors to the frontend
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

fn fail(message: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::Ok().json(ErrorResponse {
        success: false,
        message: message.to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct AddAccountTypeRequest {
    pub type_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddAccountsRequest {
    pub type_name: String,
    /// One profile url per line
    pub urls: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveAccountRequest {
    pub type_name: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct StartCollectRequest {
    pub type_name: String,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub until: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StartMultiCollectRequest {
    pub specs: Vec<BatchTaskSpec>,
    /// Window shared by all specs; a spec's own bounds take precedence
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub until: Option<i64>,
}

fn apply_shared_window(specs: &mut [BatchTaskSpec], since: Option<i64>, until: Option<i64>) {
    for spec in specs {
        if spec.window.since.is_none() {
            spec.window.since = since;
        }
        if spec.window.until.is_none() {
            spec.window.until = until;
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ArticlePageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub rewritten: Option<bool>,
    #[serde(default)]
    pub downloaded: Option<bool>,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct BatchDownloadRequest {
    pub article_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRewriteRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImportUrlsRequest {
    /// One article url per line
    pub urls: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub format: String,
    pub output_path: String,
}

/// Configure API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/account-types", web::get().to(get_account_types))
            .route("/account-types", web::post().to(add_account_type))
            .route("/account-types/{type_name}", web::delete().to(remove_account_type))
            .route("/accounts/{type_name}", web::get().to(get_accounts))
            .route("/accounts", web::post().to(add_accounts))
            .route("/accounts", web::delete().to(remove_account))
            .route("/accounts/{type_name}/clear", web::post().to(clear_accounts))
            .route("/collect/start", web::post().to(start_collect))
            .route("/collect/start-multi", web::post().to(start_multi_collect))
            .route("/collect/stop", web::post().to(stop_collect))
            .route("/collect/status", web::get().to(collect_status))
            .route("/articles", web::get().to(get_articles))
            .route("/articles/stats", web::get().to(get_article_stats))
            .route("/articles/import", web::post().to(import_articles))
            .route("/articles/export", web::post().to(export_articles))
            .route("/articles/{id}", web::delete().to(delete_article))
            .route("/articles/{id}/toggle-rewritten", web::post().to(toggle_rewritten))
            .route("/articles", web::delete().to(delete_all_articles))
            .route("/download/articles", web::get().to(get_download_articles))
            .route("/download/stats", web::get().to(get_download_stats))
            .route("/download/{id}", web::post().to(download_article))
            .route("/download/batch", web::post().to(batch_download))
            .route("/download/all", web::post().to(download_all))
            .route("/rewrite/{id}", web::post().to(rewrite_article))
            .route("/rewrite/batch", web::post().to(batch_rewrite))
            .route("/health", web::get().to(health_check)),
    );
}

async fn get_account_types(app: web::Data<Arc<FeedForge>>) -> ActixResult<HttpResponse> {
    match app.account_types().await {
        Ok(types) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "types": types,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn add_account_type(
    app: web::Data<Arc<FeedForge>>,
    req: web::Json<AddAccountTypeRequest>,
) -> ActixResult<HttpResponse> {
    match app.add_account_type(&req.type_name).await {
        Ok(true) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": "account type created",
        }))),
        Ok(false) => Ok(fail("account type already exists")),
        Err(e) => Ok(fail(e)),
    }
}

async fn remove_account_type(
    app: web::Data<Arc<FeedForge>>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    match app.remove_account_type(&path).await {
        Ok(removed) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "removed_accounts": removed,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn get_accounts(
    app: web::Data<Arc<FeedForge>>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    match app.accounts(&path).await {
        Ok(accounts) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "accounts": accounts,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn add_accounts(
    app: web::Data<Arc<FeedForge>>,
    req: web::Json<AddAccountsRequest>,
) -> ActixResult<HttpResponse> {
    match app.add_accounts(&req.type_name, &req.urls).await {
        Ok(report) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "added": report.added,
            "skipped": report.skipped,
            "invalid": report.invalid,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn remove_account(
    app: web::Data<Arc<FeedForge>>,
    req: web::Json<RemoveAccountRequest>,
) -> ActixResult<HttpResponse> {
    match app.remove_account(&req.type_name, &req.url).await {
        Ok(true) => Ok(HttpResponse::Ok().json(serde_json::json!({"success": true}))),
        Ok(false) => Ok(fail("account not found")),
        Err(e) => Ok(fail(e)),
    }
}

async fn clear_accounts(
    app: web::Data<Arc<FeedForge>>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    match app.clear_accounts(&path).await {
        Ok(removed) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "removed": removed,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn start_collect(
    app: web::Data<Arc<FeedForge>>,
    req: web::Json<StartCollectRequest>,
) -> ActixResult<HttpResponse> {
    info!("API: starting collection for type {}", req.type_name);
    let window = TimeWindow {
        since: req.since,
        until: req.until,
    };
    match app.start_batch_collect(&req.type_name, req.count, window).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": "collection started",
        }))),
        Err(e) => {
            error!("API: failed to start collection: {}", e);
            Ok(fail(e))
        }
    }
}

async fn start_multi_collect(
    app: web::Data<Arc<FeedForge>>,
    req: web::Json<StartMultiCollectRequest>,
) -> ActixResult<HttpResponse> {
    info!("API: starting multi collection ({} specs)", req.specs.len());
    let StartMultiCollectRequest { mut specs, since, until } = req.into_inner();
    apply_shared_window(&mut specs, since, until);
    match app.start_multi_batch_collect(specs).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": "collection started",
        }))),
        Err(e) => {
            error!("API: failed to start multi collection: {}", e);
            Ok(fail(e))
        }
    }
}

async fn stop_collect(app: web::Data<Arc<FeedForge>>) -> ActixResult<HttpResponse> {
    match app.stop_task() {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": "stop requested",
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn collect_status(app: web::Data<Arc<FeedForge>>) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(app.task_status()))
}

async fn get_articles(
    app: web::Data<Arc<FeedForge>>,
    query: web::Query<ArticlePageQuery>,
) -> ActixResult<HttpResponse> {
    match app.articles(query.page, query.page_size, query.rewritten).await {
        Ok((articles, total)) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "articles": articles,
            "total": total,
            "page": query.page,
            "page_size": query.page_size,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn get_article_stats(app: web::Data<Arc<FeedForge>>) -> ActixResult<HttpResponse> {
    match app.article_stats().await {
        Ok(stats) => Ok(HttpResponse::Ok().json(stats)),
        Err(e) => Ok(fail(e)),
    }
}

async fn toggle_rewritten(
    app: web::Data<Arc<FeedForge>>,
    path: web::Path<i64>,
) -> ActixResult<HttpResponse> {
    match app.toggle_rewritten(*path).await {
        Ok(flag) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "is_rewritten": flag,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn delete_article(
    app: web::Data<Arc<FeedForge>>,
    path: web::Path<i64>,
) -> ActixResult<HttpResponse> {
    match app.delete_article(*path).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({"success": true}))),
        Err(e) => Ok(fail(e)),
    }
}

async fn delete_all_articles(app: web::Data<Arc<FeedForge>>) -> ActixResult<HttpResponse> {
    match app.delete_all_articles().await {
        Ok(removed) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "removed": removed,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn import_articles(
    app: web::Data<Arc<FeedForge>>,
    req: web::Json<ImportUrlsRequest>,
) -> ActixResult<HttpResponse> {
    match app.import_article_urls(&req.urls).await {
        Ok(report) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": report.added > 0,
            "added": report.added,
            "skipped": report.skipped,
            "invalid": report.invalid,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn export_articles(
    app: web::Data<Arc<FeedForge>>,
    req: web::Json<ExportRequest>,
) -> ActixResult<HttpResponse> {
    let format: ExportFormat = match req.format.parse() {
        Ok(format) => format,
        Err(e) => return Ok(fail(e)),
    };
    match app
        .export_articles(format, std::path::Path::new(&req.output_path))
        .await
    {
        Ok(stats) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "records": stats.records,
            "path": stats.path,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn get_download_articles(
    app: web::Data<Arc<FeedForge>>,
    query: web::Query<ArticlePageQuery>,
) -> ActixResult<HttpResponse> {
    match app
        .download_articles_page(query.page, query.page_size, query.downloaded)
        .await
    {
        Ok((articles, total)) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "articles": articles,
            "total": total,
            "page": query.page,
            "page_size": query.page_size,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn get_download_stats(app: web::Data<Arc<FeedForge>>) -> ActixResult<HttpResponse> {
    match app.download_stats().await {
        Ok(stats) => Ok(HttpResponse::Ok().json(stats)),
        Err(e) => Ok(fail(e)),
    }
}

async fn download_article(
    app: web::Data<Arc<FeedForge>>,
    path: web::Path<i64>,
) -> ActixResult<HttpResponse> {
    match app.download_article(*path).await {
        Ok(doc_path) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "doc_path": doc_path,
        }))),
        Err(e) => {
            error!("API: download failed: {}", e);
            Ok(fail(e))
        }
    }
}

async fn batch_download(
    app: web::Data<Arc<FeedForge>>,
    req: web::Json<BatchDownloadRequest>,
) -> ActixResult<HttpResponse> {
    match app.batch_download(&req.article_ids).await {
        Ok((success, failed)) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "downloaded": success,
            "failed": failed,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn download_all(app: web::Data<Arc<FeedForge>>) -> ActixResult<HttpResponse> {
    match app.download_all().await {
        Ok((success, failed)) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "downloaded": success,
            "failed": failed,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn rewrite_article(
    app: web::Data<Arc<FeedForge>>,
    path: web::Path<i64>,
) -> ActixResult<HttpResponse> {
    match app.rewrite_article(*path).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "result": outcome,
        }))),
        Err(e) => {
            error!("API: rewrite failed: {}", e);
            Ok(fail(e))
        }
    }
}

async fn batch_rewrite(
    app: web::Data<Arc<FeedForge>>,
    req: web::Json<BatchRewriteRequest>,
) -> ActixResult<HttpResponse> {
    match app.batch_rewrite(req.force).await {
        Ok(report) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "total": report.total,
            "rewritten": report.success,
            "deleted": report.deleted,
            "failed": report.failed,
        }))),
        Err(e) => Ok(fail(e)),
    }
}

async fn health_check() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_window_fills_unset_spec_bounds() {
        let req: StartMultiCollectRequest = serde_json::from_value(serde_json::json!({
            "specs": [
                {"type_name": "tech", "count": 0},
                {"type_name": "finance", "count": 2, "since": 50},
            ],
            "since": 100,
            "until": 200,
        }))
        .unwrap();

        let StartMultiCollectRequest { mut specs, since, until } = req;
        apply_shared_window(&mut specs, since, until);

        assert_eq!(specs[0].window.since, Some(100));
        assert_eq!(specs[0].window.until, Some(200));
        // A spec's own lower bound wins over the shared one
        assert_eq!(specs[1].window.since, Some(50));
        assert_eq!(specs[1].window.until, Some(200));
    }
}
