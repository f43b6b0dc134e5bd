use std::path::Path;

use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::element::Element;
use tracing::{debug, warn};

use crate::llm::AgentAction;

use super::automation::PageSession;
use super::error::{BrowserError, BrowserResult};
use super::human::HumanMotion;

/// Generic file-input selectors tried when the model's selector misses.
/// ATS widgets routinely hide the real input behind a styled button.
const FILE_INPUT_FALLBACKS: [&str; 3] = [
    "input[type='file']",
    "input[accept*='pdf']",
    "input[name*='resume']",
];

/// Executes one page-touching action. `Done` and `Stuck` are decisions, not
/// page actions; callers handle those before reaching here.
pub async fn perform(
    session: &PageSession,
    human: &mut HumanMotion,
    action: &AgentAction,
    resume_path: &Path,
) -> BrowserResult<()> {
    match action {
        AgentAction::Click { selector } => {
            let element = session.find_element(selector).await?;
            human.click_element(session.page(), &element).await
        }
        AgentAction::Type { selector, text } => {
            let element = session.find_element(selector).await?;
            human.type_text(session.page(), &element, text).await
        }
        AgentAction::Upload { selector } => {
            upload_resume(session, selector, resume_path).await
        }
        AgentAction::Done { .. } | AgentAction::Stuck { .. } => Ok(()),
    }
}

/// Attaches the resume to a file input, preferring the model's selector and
/// falling back to common file-input shapes.
pub async fn upload_resume(
    session: &PageSession,
    selector: &str,
    resume_path: &Path,
) -> BrowserResult<()> {
    let element = match session.find_element(selector).await {
        Ok(element) => element,
        Err(_) => {
            debug!(selector = %selector, "upload selector missed, trying fallbacks");
            session
                .find_first(&FILE_INPUT_FALLBACKS)
                .await
                .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))?
        }
    };
    reveal_if_hidden(&element).await;
    let resume = resume_path
        .to_str()
        .ok_or_else(|| BrowserError::Upload("resume path is not valid utf-8".into()))?;
    let params = SetFileInputFilesParams::builder()
        .files(vec![resume.to_string()])
        .object_id(element.remote_object_id.clone())
        .build()
        .map_err(BrowserError::Configuration)?;
    session.page().execute(params).await?;
    debug!(file = %resume, "resume attached to file input");
    Ok(())
}

/// Un-hides a display:none file input so CDP can address it. Styled upload
/// buttons usually proxy clicks to an invisible input.
async fn reveal_if_hidden(element: &Element) {
    let result = element
        .call_js_fn(
            "function() {
                const style = window.getComputedStyle(this);
                if (style.display === 'none' || style.visibility === 'hidden') {
                    this.style.display = 'block';
                    this.style.visibility = 'visible';
                    this.style.opacity = '1';
                }
            }",
            false,
        )
        .await;
    if let Err(err) = result {
        warn!(error = %err, "could not inspect file input visibility");
    }
}
