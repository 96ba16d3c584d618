use leasedrop_browser::{BrowserActions, ChromiumLauncher, Locator, SessionFactory};
use leasedrop_core::BrowserConfig;
use std::time::Duration;

#[tokio::test]
#[ignore] // Requires Chrome/Chromium installed
async fn test_session_open_and_close() {
    let launcher = ChromiumLauncher::new(BrowserConfig::default());
    let session = launcher.open().await.expect("launch");
    let user_agent = session.evaluate("navigator.userAgent").await.unwrap();
    assert!(user_agent.as_str().unwrap_or_default().contains("Chrome/"));

    session.close().await.unwrap();
    // Second close is a no-op
    session.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Chrome/Chromium installed
async fn test_navigation_and_capture() {
    let launcher = ChromiumLauncher::new(BrowserConfig::default());
    let session = launcher.open().await.unwrap();

    session
        .navigate("data:text/html,<title>Comptroller</title><a href='#'>Lease Drop-Crude Oil</a>")
        .await
        .unwrap();
    assert_eq!(session.title().await.unwrap(), "Comptroller");
    session
        .wait_until_clickable(
            &Locator::link_text("Lease Drop-Crude Oil"),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

    let snapshot = session.capture().await.unwrap();
    assert!(snapshot.png.is_some());
    assert!(snapshot.html.contains("Lease Drop-Crude Oil"));

    session.close().await.unwrap();
    assert!(session.capture().await.is_err());
}

#[tokio::test]
#[ignore] // Requires Chrome/Chromium installed
async fn test_missing_element_times_out() {
    let launcher = ChromiumLauncher::new(BrowserConfig::default());
    let session = launcher.open().await.unwrap();
    session.navigate("data:text/html,<p>empty</p>").await.unwrap();

    let err = session
        .wait_until_clickable(&Locator::css("#leaseNum"), Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("#leaseNum"));

    session.close().await.unwrap();
}
