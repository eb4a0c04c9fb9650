//! Login screen.

use super::step_failure;
use crate::driver::selectors::{HomePageSelectors, LoginPageSelectors};
use crate::driver::UiSession;
use crate::error::{AutomationError, Error, Result};
use crate::types::Credentials;
use std::time::Duration;
use tracing::info;

/// Logs into the ERP and verifies the landing page
pub struct AuthenticationStep<'a> {
    login: &'a LoginPageSelectors,
    home: &'a HomePageSelectors,
    timeout: Duration,
}

impl<'a> AuthenticationStep<'a> {
    /// `timeout` bounds the wait for each element
    pub fn new(login: &'a LoginPageSelectors, home: &'a HomePageSelectors, timeout: Duration) -> Self {
        Self {
            login,
            home,
            timeout,
        }
    }

    /// Open `login_url`, submit the credentials and wait for the post-login marker
    pub async fn run(
        &self,
        session: &mut dyn UiSession,
        login_url: &str,
        credentials: &Credentials,
    ) -> Result<()> {
        self.submit(session, login_url, credentials)
            .await
            .map_err(|e| step_failure(e, AutomationError::Login))?;

        session
            .wait_for(&self.home.sidebar_tax, self.timeout)
            .await
            .map_err(|_| {
                Error::Automation(AutomationError::Login(
                    "post-login page not reached; check the credentials".to_string(),
                ))
            })?;

        info!(username = %credentials.username, "login verified");
        Ok(())
    }

    async fn submit(
        &self,
        session: &mut dyn UiSession,
        login_url: &str,
        credentials: &Credentials,
    ) -> Result<()> {
        session.navigate(login_url).await?;
        session
            .wait_for(&self.login.username_input, self.timeout)
            .await?;
        session
            .fill(&self.login.username_input, &credentials.username)
            .await?;
        session
            .fill(&self.login.password_input, &credentials.password)
            .await?;
        session.click(&self.login.login_button).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Script, ScriptedSession, actions, sample_selectors, set_absent};

    fn credentials() -> Credentials {
        Credentials {
            username: "operador".into(),
            password: "segredo".into(),
        }
    }

    #[tokio::test]
    async fn fills_the_form_and_checks_the_marker() {
        let selectors = sample_selectors();
        let script = Script::shared();
        let mut session = ScriptedSession::new(script.clone());

        AuthenticationStep::new(&selectors.login_page, &selectors.home_page, Duration::from_secs(1))
            .run(&mut session, "https://erp.example/login", &credentials())
            .await
            .unwrap();

        let log = actions(&script);
        assert_eq!(log[0], "navigate https://erp.example/login");
        assert!(log.contains(&"fill #usuario=operador".to_string()));
        assert!(log.contains(&"fill #senha=segredo".to_string()));
        assert_eq!(log.last().unwrap(), "wait #menu-fiscal");
    }

    #[tokio::test]
    async fn missing_marker_is_a_login_failure() {
        let selectors = sample_selectors();
        let script = Script::shared();
        set_absent(&script, &selectors.home_page.sidebar_tax);
        let mut session = ScriptedSession::new(script);

        let err = AuthenticationStep::new(
            &selectors.login_page,
            &selectors.home_page,
            Duration::from_millis(10),
        )
        .run(&mut session, "https://erp.example/login", &credentials())
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Automation(AutomationError::Login(_))));
    }

    #[tokio::test]
    async fn missing_form_field_is_a_login_failure() {
        let selectors = sample_selectors();
        let script = Script::shared();
        set_absent(&script, &selectors.login_page.password_input);
        let mut session = ScriptedSession::new(script);

        let err = AuthenticationStep::new(
            &selectors.login_page,
            &selectors.home_page,
            Duration::from_millis(10),
        )
        .run(&mut session, "https://erp.example/login", &credentials())
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Automation(AutomationError::Login(ref m)) if m.contains("#senha")));
    }
}
