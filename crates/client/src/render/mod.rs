//! Headless browser screenshots.
//!
//! This module provides a capture trait, a feature-gated chromiumoxide
//! implementation, and the crop post-processing step.

pub mod crop;

use bytes::Bytes;
use linkscope_core::config::{CaptureFormat, CropArea, ScreenshotConfig};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub use crop::crop_image;

/// Errors that can occur while capturing a page.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Failed to launch or connect to browser.
    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),

    /// Failed to navigate to URL.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The browser returned no image.
    #[error("screenshot failed: {0}")]
    Capture(String),

    /// Timeout waiting for page to load.
    #[error("render timeout after {0}ms")]
    Timeout(u64),

    /// Capture support was not compiled in.
    #[error("screenshot support not compiled in")]
    Disabled,
}

impl From<RenderError> for linkscope_core::Error {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Disabled => linkscope_core::Error::RenderDisabled,
            other => linkscope_core::Error::CaptureFailed(other.to_string()),
        }
    }
}

/// Options for one capture.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Viewport dimensions (default: 1280x720).
    pub width: u32,
    pub height: u32,
    /// JPEG quality, ignored for PNG.
    pub quality: u8,
    pub format: CaptureFormat,
    pub full_page: bool,
    /// Settle time after navigation before the shot is taken.
    pub wait_ms: u64,
    /// Overall budget for navigation plus capture.
    pub timeout: Duration,
    pub crop: Option<CropArea>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::from(&ScreenshotConfig::default())
    }
}

impl From<&ScreenshotConfig> for CaptureOptions {
    fn from(config: &ScreenshotConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            quality: config.quality,
            format: config.format,
            full_page: config.full_page,
            wait_ms: config.wait_ms,
            timeout: Duration::from_millis(30_000 + config.wait_ms),
            crop: config.crop,
        }
    }
}

/// Anything that can turn a URL into encoded image bytes.
#[async_trait::async_trait]
pub trait Capturer: Send + Sync {
    async fn capture(&self, url: &Url, opts: &CaptureOptions) -> Result<Bytes, RenderError>;

    /// Release the backend. Captures after this may fail.
    async fn shutdown(&self) {}
}

/// Capture `url` and apply the configured crop.
///
/// A failed crop is logged and the uncropped image is returned instead.
pub async fn capture_with_crop(
    capturer: &dyn Capturer,
    url: &Url,
    opts: &CaptureOptions,
) -> Result<Bytes, RenderError> {
    let image = capturer.capture(url, opts).await?;

    let Some(area) = opts.crop else {
        return Ok(image);
    };

    let data = image.clone();
    let (format, quality) = (opts.format, opts.quality);
    let cropped =
        tokio::task::spawn_blocking(move || crop_image(&data, area, format, quality)).await;

    match cropped {
        Ok(Ok(cropped)) => Ok(cropped),
        Ok(Err(e)) => {
            tracing::warn!(url = %url, "crop failed, keeping full screenshot: {e}");
            Ok(image)
        }
        Err(e) => {
            tracing::warn!(url = %url, "crop task failed, keeping full screenshot: {e}");
            Ok(image)
        }
    }
}

/// Capturer used when screenshots are turned off or not compiled in.
pub struct DisabledCapturer;

#[async_trait::async_trait]
impl Capturer for DisabledCapturer {
    async fn capture(&self, _url: &Url, _opts: &CaptureOptions) -> Result<Bytes, RenderError> {
        Err(RenderError::Disabled)
    }
}

#[cfg(feature = "render")]
pub use headless::HeadlessCapturer;

#[cfg(feature = "render")]
mod headless {
    use super::*;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use chromiumoxide::cdp::browser_protocol::browser::CloseParams;
    use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
    use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
    use chromiumoxide::handler::viewport::Viewport;
    use chromiumoxide::page::ScreenshotParams;
    use futures_util::StreamExt;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;

    /// How long shutdown waits for the event loop to drain after closing the browser.
    const CLOSE_GRACE: Duration = Duration::from_secs(5);

    /// Headless Chrome/Chromium capturer using chromiumoxide.
    pub struct HeadlessCapturer {
        browser: Browser,
        /// Taken by [`HeadlessCapturer::shutdown`].
        handler: Mutex<Option<JoinHandle<()>>>,
    }

    impl HeadlessCapturer {
        /// Launch a headless browser sized to the configured viewport.
        ///
        /// A background task drains Chrome DevTools Protocol events for the
        /// lifetime of the capturer.
        pub async fn launch(config: &ScreenshotConfig) -> Result<Self, RenderError> {
            let browser_config = BrowserConfig::builder()
                .viewport(Some(Viewport {
                    width: config.width,
                    height: config.height,
                    device_scale_factor: Some(1.0),
                    ..Default::default()
                }))
                .args([
                    "--disable-gpu",
                    "--disable-dev-shm-usage",
                    "--no-first-run",
                    "--hide-scrollbars",
                ])
                .build()
                .map_err(RenderError::BrowserLaunch)?;

            let (browser, mut handler) = Browser::launch(browser_config)
                .await
                .map_err(|e| RenderError::BrowserLaunch(e.to_string()))?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        tracing::debug!("browser handler event error: {e}");
                        break;
                    }
                }
            });

            tracing::info!("Headless browser launched");
            Ok(Self { browser, handler: Mutex::new(Some(handler)) })
        }

        /// Ask the browser to exit, then wait for the event loop to finish.
        ///
        /// The event loop is aborted if it is still running after [`CLOSE_GRACE`].
        pub async fn shutdown(&self) {
            let Some(handler) = self.handler.lock().await.take() else {
                return;
            };

            if let Err(e) = self.browser.execute(CloseParams::default()).await {
                tracing::debug!("browser close request failed: {e}");
            }

            let abort = handler.abort_handle();
            match tokio::time::timeout(CLOSE_GRACE, handler).await {
                Ok(_) => tracing::info!("Headless browser closed"),
                Err(_) => {
                    abort.abort();
                    tracing::warn!("browser event loop still running after close, aborted");
                }
            }
        }

        async fn shoot(&self, url: &Url, opts: &CaptureOptions) -> Result<Vec<u8>, RenderError> {
            let page = self
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| RenderError::Navigation(e.to_string()))?;

            let (width, height) = (i64::from(opts.width), i64::from(opts.height));
            let metrics = SetDeviceMetricsOverrideParams::new(width, height, 1.0, false);
            if let Err(e) = page.execute(metrics).await {
                tracing::debug!("viewport override rejected: {e}");
            }

            let navigated = async {
                page.goto(url.as_str()).await?;
                page.wait_for_navigation().await?;
                Ok::<_, chromiumoxide::error::CdpError>(())
            }
            .await;
            if let Err(e) = navigated {
                page.close().await.ok();
                return Err(RenderError::Navigation(e.to_string()));
            }

            if opts.wait_ms > 0 {
                tokio::time::sleep(Duration::from_millis(opts.wait_ms)).await;
            }

            let format = match opts.format {
                CaptureFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
                CaptureFormat::Png => CaptureScreenshotFormat::Png,
            };
            let mut params = ScreenshotParams::builder().format(format).full_page(opts.full_page);
            if opts.format == CaptureFormat::Jpeg {
                params = params.quality(i64::from(opts.quality));
            }

            let shot = page
                .screenshot(params.build())
                .await
                .map_err(|e| RenderError::Capture(e.to_string()));
            page.close().await.ok();
            shot
        }
    }

    #[async_trait::async_trait]
    impl Capturer for HeadlessCapturer {
        async fn capture(&self, url: &Url, opts: &CaptureOptions) -> Result<Bytes, RenderError> {
            let start = std::time::Instant::now();
            let budget_ms = opts.timeout.as_millis() as u64;

            let data = tokio::time::timeout(opts.timeout, self.shoot(url, opts))
                .await
                .map_err(|_| RenderError::Timeout(budget_ms))??;

            if data.is_empty() {
                return Err(RenderError::Capture("empty image".into()));
            }

            let elapsed_ms = start.elapsed().as_millis();
            tracing::debug!(
                url = %url,
                bytes = data.len(),
                "captured screenshot in {elapsed_ms}ms"
            );
            Ok(Bytes::from(data))
        }

        async fn shutdown(&self) {
            HeadlessCapturer::shutdown(self).await;
        }
    }

    impl Drop for HeadlessCapturer {
        fn drop(&mut self) {
            if let Some(handler) = self.handler.get_mut().take() {
                handler.abort();
            }
        }
    }
}
