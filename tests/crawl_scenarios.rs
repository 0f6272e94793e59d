use std::sync::Arc;
use std::time::Duration;

use adaptive_crawler::browser::testing::StaticBrowser;
use adaptive_crawler::cli::config::CrawlerConfig;
use adaptive_crawler::crawler::{CrawlerController, TaskSettings, TaskStatus};
use adaptive_crawler::extract::ExtractedContentItem;
use adaptive_crawler::progress::ProgressEvent;
use adaptive_crawler::storage::MemoryStatusStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Semaphore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PARAGRAPH: &str = "Plenty of words in this paragraph so that it clears the text threshold.";

fn controller(browser: &StaticBrowser, max_concurrent: usize) -> CrawlerController {
    let mut config = CrawlerConfig::default();
    config.crawler.max_concurrent = max_concurrent;
    CrawlerController::with_components(
        config,
        Arc::new(browser.clone()),
        Arc::new(MemoryStatusStore::new()),
    )
    .unwrap()
}

fn without_robots() -> TaskSettings {
    TaskSettings {
        respect_robots: false,
        ..TaskSettings::default()
    }
}

async fn collect_until_terminal(
    events: &mut tokio::sync::broadcast::Receiver<ProgressEvent>,
    task_id: &str,
) -> Vec<ProgressEvent> {
    let mut seen = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), events.recv()).await {
            Ok(Ok(event)) if event.task_id == task_id => {
                let terminal = event.status.is_terminal();
                seen.push(event);
                if terminal {
                    return seen;
                }
            }
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) | Err(_) => return seen,
        }
    }
}

#[tokio::test]
async fn seed_with_two_links_at_depth_one() {
    let browser = StaticBrowser::new()
        .with_page(
            "http://a.test/",
            format!(
                r#"<html><body>
                   <p>{PARAGRAPH}</p><p>{PARAGRAPH}</p>
                   <a href="http://b.test/">B</a> <a href="http://c.test/">C</a>
                   </body></html>"#
            ),
        )
        .with_page(
            "http://b.test/",
            format!(r#"<h2>{PARAGRAPH}</h2><img src="/banner.png" width="640" height="200" alt="banner">"#),
        )
        .with_page("http://c.test/", format!("<article>{PARAGRAPH}</article>"));
    let controller = controller(&browser, 10);
    let mut events = controller.subscribe_all();

    let task_id = controller
        .create_task(&["http://a.test".to_string()], 1, without_robots())
        .await
        .unwrap();
    let events = collect_until_terminal(&mut events, &task_id).await;
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(report.stats.pages_crawled, 3);
    assert_eq!(report.stats.elements_found, 5);
    assert_eq!(report.operations_submitted, 3);
    assert!(!report.site_structure.as_ref().unwrap().login_required);
    assert!(report.content.contains(&ExtractedContentItem::Image {
        src: "http://b.test/banner.png".to_string(),
        alt_text: "banner".to_string(),
    }));

    assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
    let last = events.last().unwrap();
    assert_eq!((last.status, last.progress), (TaskStatus::Completed, 100));

    let status = controller.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.error_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_share_the_global_cap() {
    let mut browser = StaticBrowser::new();
    for site in ["x", "y"] {
        let mut home = String::new();
        for n in 0..6 {
            home.push_str(&format!(r#"<a href="/page{n}">{n}</a>"#));
            browser = browser.with_page(&format!("http://{site}.test/page{n}"), format!("<p>{PARAGRAPH}</p>"));
        }
        browser = browser.with_page(&format!("http://{site}.test/"), home);
    }
    let controller = controller(&browser, 2);

    let x = controller
        .create_task(&["http://x.test/".to_string()], 1, without_robots())
        .await
        .unwrap();
    let y = controller
        .create_task(&["http://y.test/".to_string()], 1, without_robots())
        .await
        .unwrap();

    let x = controller.wait(&x).await.unwrap();
    let y = controller.wait(&y).await.unwrap();

    assert_eq!(x.stats.pages_crawled, 7);
    assert_eq!(y.stats.pages_crawled, 7);
    assert!(browser.peak_sessions() <= 2);
    assert!(controller.scheduler().peak_in_flight() <= 2);
    assert_eq!(controller.scheduler().in_flight(), 0);
    assert_eq!(controller.scheduler().waiting(), 0);
    assert_eq!(controller.scheduler().total_completed(), 14);
}

#[tokio::test]
async fn cancel_through_the_controller() {
    let gate = Arc::new(Semaphore::new(0));
    let mut browser = StaticBrowser::new().with_gate(gate.clone());
    let mut home = String::new();
    for n in 0..4 {
        home.push_str(&format!(r#"<a href="/n{n}">{n}</a>"#));
        browser = browser.with_page(&format!("http://a.test/n{n}"), r#"<a href="/deeper">deeper</a>"#);
    }
    let browser = browser.with_page("http://a.test/", home);
    let controller = controller(&browser, 10);

    let task_id = controller
        .create_task(&["http://a.test/".to_string()], 5, without_robots())
        .await
        .unwrap();

    gate.add_permits(1);
    while browser.navigations() < 5 {
        tokio::task::yield_now().await;
    }
    controller.cancel(&task_id).unwrap();
    let submitted = controller.scheduler().total_submitted();
    gate.add_permits(64);

    let report = controller.wait(&task_id).await.unwrap();
    assert_eq!(report.status, TaskStatus::Cancelled);
    assert_eq!(controller.scheduler().total_submitted(), submitted);
    assert!(!report.visited.iter().any(|url| url.ends_with("/deeper")));

    let status = controller.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Cancelled);
    assert!(!controller.pause(&task_id).await.unwrap());
}

#[tokio::test]
async fn robots_rules_filter_discovered_links_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
        .mount(&server)
        .await;

    let base = server.uri();
    let browser = StaticBrowser::new()
        .with_page(
            &format!("{base}/private/start"),
            r#"<a href="/public">public</a><a href="/private/secret">secret</a>"#,
        )
        .with_page(&format!("{base}/public"), format!("<p>{PARAGRAPH}</p>"))
        .with_page(&format!("{base}/private/secret"), format!("<p>{PARAGRAPH}</p>"));
    let controller = controller(&browser, 4);

    let task_id = controller
        .create_task(&[format!("{base}/private/start")], 1, TaskSettings::default())
        .await
        .unwrap();
    let report = controller.wait(&task_id).await.unwrap();

    // The seed itself is disallowed but was named explicitly
    assert_eq!(report.stats.pages_crawled, 2);
    assert_eq!(browser.attempts(&format!("{base}/public")), 1);
    assert_eq!(browser.attempts(&format!("{base}/private/secret")), 0);
}
