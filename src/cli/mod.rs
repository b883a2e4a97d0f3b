//! Interactive menu driver.
//!
//! A thin front over the core: it prompts, forwards validated input to
//! [`AuthService`] operations, and prints results. No business logic and
//! no authorization decisions live here; admin entries are hidden from
//! the menu for convenience but the service refuses them on its own.

use anyhow::Result;
use dialoguer::{Input, Password, Select};
use tokio::runtime::Runtime;

use crate::services::{AuthError, AuthService, CoreAuthService};
use crate::session::SessionState;

const LOG_VIEW_LIMIT: usize = 50;

pub struct Driver<'a> {
    runtime: &'a Runtime,
    service: &'a CoreAuthService,
    session: SessionState,
}

impl<'a> Driver<'a> {
    #[must_use]
    pub fn new(runtime: &'a Runtime, service: &'a CoreAuthService) -> Self {
        Self {
            runtime,
            service,
            session: SessionState::new(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            let choice = Select::new()
                .with_prompt("Authentication system")
                .items(&["Register", "Login", "Recover password", "Exit"])
                .default(0)
                .interact()?;

            match choice {
                0 => self.register()?,
                1 => self.login()?,
                2 => self.recover_password()?,
                _ => {
                    println!("Bye.");
                    return Ok(());
                }
            }
        }
    }

    fn register(&mut self) -> Result<()> {
        let username: String = Input::new().with_prompt("Username").interact_text()?;
        let email: String = Input::new().with_prompt("Email").interact_text()?;
        let password = Password::new().with_prompt("Password").interact()?;
        let role: String = Input::new()
            .with_prompt("Role (admin/user)")
            .default("user".to_string())
            .interact_text()?;

        let result = self
            .runtime
            .block_on(self.service.register(&username, &email, &password, &role));

        match result {
            Ok(user) => println!("Registered '{}' (role: {}).", user.username, user.role),
            Err(e) => println!("{e}"),
        }
        Ok(())
    }

    fn login(&mut self) -> Result<()> {
        let username: String = Input::new().with_prompt("Username").interact_text()?;
        let password = Password::new().with_prompt("Password").interact()?;

        let result = self
            .runtime
            .block_on(self.service.login(&mut self.session, &username, &password));

        match result {
            Ok(user) => {
                println!("Welcome {} (role: {})", user.username, user.role);
                self.post_login_menu()?;
            }
            Err(e) => println!("{e}"),
        }
        Ok(())
    }

    fn recover_password(&mut self) -> Result<()> {
        let email: String = Input::new().with_prompt("Email").interact_text()?;

        match self.runtime.block_on(self.service.recover_password(&email)) {
            Ok(temp) => println!("(SIMULATED) Temporary password: {temp}"),
            Err(e) => println!("{e}"),
        }
        Ok(())
    }

    fn post_login_menu(&mut self) -> Result<()> {
        while self.session.is_authenticated() {
            let mut items = vec!["View profile", "Edit profile", "Logout"];
            if self.session.is_admin() {
                items.extend(["View users", "View logs", "Edit user", "Delete user"]);
            }

            let choice = Select::new()
                .with_prompt("Menu")
                .items(&items)
                .default(0)
                .interact()?;

            match choice {
                0 => {
                    if let Some(user) = self.session.current() {
                        println!(
                            "#{} {} <{}> role={} active={} created={}",
                            user.id, user.username, user.email, user.role, user.active,
                            user.created_at
                        );
                    }
                }
                1 => self.edit_profile()?,
                2 => {
                    self.runtime
                        .block_on(self.service.logout(&mut self.session))?;
                    println!("Logged out.");
                }
                3 => self.view_users()?,
                4 => self.view_logs()?,
                5 => self.edit_user_admin()?,
                6 => self.delete_user()?,
                _ => {}
            }
        }
        Ok(())
    }

    fn edit_profile(&mut self) -> Result<()> {
        let choice = Select::new()
            .with_prompt("Edit profile")
            .items(&[
                "Change email",
                "Change username",
                "Change password",
                "Toggle active",
                "Back",
            ])
            .default(0)
            .interact()?;

        let result = match choice {
            0 => {
                let email: String = Input::new().with_prompt("New email").interact_text()?;
                self.runtime
                    .block_on(self.service.change_email(&mut self.session, &email))
                    .map(|u| format!("Email updated to {}.", u.email))
            }
            1 => {
                let username: String = Input::new().with_prompt("New username").interact_text()?;
                self.runtime
                    .block_on(self.service.change_username(&mut self.session, &username))
                    .map(|u| format!("Username updated to {}.", u.username))
            }
            2 => {
                let password = Password::new().with_prompt("New password").interact()?;
                self.runtime
                    .block_on(self.service.change_password(&mut self.session, &password))
                    .map(|_| "Password updated.".to_string())
            }
            3 => self
                .runtime
                .block_on(self.service.toggle_active(&mut self.session))
                .map(|u| format!("Active flag is now {}.", u.active)),
            _ => return Ok(()),
        };

        match result {
            Ok(msg) => println!("{msg}"),
            Err(e) => println!("{e}"),
        }
        Ok(())
    }

    fn view_users(&mut self) -> Result<()> {
        match self.runtime.block_on(self.service.list_users(&self.session)) {
            Ok(users) => {
                for user in users {
                    println!(
                        "#{} {} <{}> role={} active={} created={}",
                        user.id, user.username, user.email, user.role, user.active,
                        user.created_at
                    );
                }
            }
            Err(e) => println!("{e}"),
        }
        Ok(())
    }

    fn view_logs(&mut self) -> Result<()> {
        match self
            .runtime
            .block_on(self.service.recent_logs(&self.session, LOG_VIEW_LIMIT))
        {
            Ok(entries) => {
                for entry in entries {
                    println!(
                        "{} {} {} from {}",
                        entry.timestamp.to_rfc3339(),
                        entry.actor,
                        entry.action,
                        entry.source_address
                    );
                }
            }
            Err(e) => println!("{e}"),
        }
        Ok(())
    }

    fn edit_user_admin(&mut self) -> Result<()> {
        let Some(target_id) = self.prompt_user_id()? else {
            return Ok(());
        };

        let choice = Select::new()
            .with_prompt("Edit user")
            .items(&["Change role", "Change email", "Force temporary password", "Back"])
            .default(0)
            .interact()?;

        let result = match choice {
            0 => {
                let role: String = Input::new()
                    .with_prompt("New role (admin/user)")
                    .interact_text()?;
                self.runtime
                    .block_on(self.service.admin_change_role(&self.session, target_id, &role))
                    .map(|u| format!("Role updated to {}.", u.role))
            }
            1 => {
                let email: String = Input::new().with_prompt("New email").interact_text()?;
                self.runtime
                    .block_on(
                        self.service
                            .admin_change_email(&self.session, target_id, &email),
                    )
                    .map(|u| format!("Email updated to {}.", u.email))
            }
            2 => self
                .runtime
                .block_on(self.service.admin_force_password(&self.session, target_id))
                .map(|temp| format!("Temporary password: {temp}")),
            _ => return Ok(()),
        };

        match result {
            Ok(msg) => println!("{msg}"),
            Err(e) => println!("{e}"),
        }
        Ok(())
    }

    fn delete_user(&mut self) -> Result<()> {
        let Some(target_id) = self.prompt_user_id()? else {
            return Ok(());
        };

        match self
            .runtime
            .block_on(self.service.delete_user(&self.session, target_id))
        {
            Ok(true) => println!("User deleted."),
            Ok(false) => println!("{}", AuthError::UserNotFound),
            Err(e) => println!("{e}"),
        }
        Ok(())
    }

    fn prompt_user_id(&self) -> Result<Option<i32>> {
        let raw: String = Input::new().with_prompt("User id").interact_text()?;
        match raw.trim().parse() {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                println!("Invalid id.");
                Ok(None)
            }
        }
    }
}
