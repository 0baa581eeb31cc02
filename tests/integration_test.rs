use crm_invoice_fetch::browser::{connect_to_browser, launch_browser};
use crm_invoice_fetch::config::{Config, DEFAULT_CONFIG_PATH};
use crm_invoice_fetch::infrastructure::PageDriver;
use crm_invoice_fetch::{logger, ChromiumLauncher, Runner};
use std::path::Path;

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_fetch_from_input_file() {
    // 加载配置
    let config = Config::load(Path::new(DEFAULT_CONFIG_PATH)).expect("加载配置失败");

    // 初始化日志
    logger::init(&config.log_level, &config.log_dir).expect("初始化日志失败");
    config.validate().expect("配置校验失败");

    // 注意：请在配置中设置 input_path
    let input = config.input_path.clone().expect("未配置 input_path");

    let runner = Runner::new(config, ChromiumLauncher);
    let report = runner.run_from_input(&input).await;

    assert!(report.is_success(), "运行不应出现致命错误: {:?}", report.fatal);
    assert_eq!(
        report.stats.success + report.stats.failed + report.stats.skipped,
        report.stats.total
    );
}

#[tokio::test]
#[ignore]
async fn test_browser_launch() {
    // 加载配置
    let config = Config::load(Path::new(DEFAULT_CONFIG_PATH)).expect("加载配置失败");

    // 启动浏览器并打开 CRM
    let driver = launch_browser(&config.launch_settings())
        .await
        .expect("启动浏览器失败");
    driver.goto(&config.crm_url).await.expect("打开 CRM 失败");

    let text = driver.body_text().await.expect("读取页面内容失败");
    assert!(!text.trim().is_empty(), "页面应该有内容");

    driver.shutdown().await.expect("关闭浏览器失败");
}

#[tokio::test]
#[ignore]
async fn test_browser_connection() {
    // 加载配置
    let config = Config::load(Path::new(DEFAULT_CONFIG_PATH)).expect("加载配置失败");
    let port = config.browser_debug_port.unwrap_or(9222);

    // 测试浏览器连接
    let result = connect_to_browser(port, &config.launch_settings()).await;

    assert!(result.is_ok(), "应该能够成功连接浏览器");
    if let Ok(driver) = result {
        driver.shutdown().await.expect("关闭页面失败");
    }
}
