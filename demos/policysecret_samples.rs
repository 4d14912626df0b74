/*
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the MIT License. See the LICENSE file in the project root for full license information.
 */

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use tpm2_policysecret::auth_session::AuthSpec;
use tpm2_policysecret::config::{EntityLocator, PolicySecretConfig};
use tpm2_policysecret::context::TpmContext;
use tpm2_policysecret::device::{SoftTpm, TpmDevice};
use tpm2_policysecret::files::{self, FsStore};
use tpm2_policysecret::tpm_types::{TPM_ALG_ID, TPM_RH, TPM_SE};

/// Walks through the PolicySecret flows against the software TPM
struct PolicySecretSamples {
    workdir: PathBuf,
}

impl PolicySecretSamples {
    fn new() -> Result<Self, Box<dyn Error>> {
        let workdir = std::env::temp_dir().join("tpm2-policysecret-samples");
        fs::create_dir_all(&workdir)?;
        Ok(Self { workdir })
    }

    fn run_all_samples(&self) -> Result<(), Box<dyn Error>> {
        self.announce("Starting PolicySecret Samples");

        self.trial_policy()?;
        self.owner_ticket()?;

        self.announce("All samples completed");
        Ok(())
    }

    fn announce(&self, title: &str) {
        println!("\n================================================================================");
        println!("        {}", title);
        println!("================================================================================\n");
    }

    /// Starts a session and stores its context the way tpm2_startauthsession would
    fn start_session(
        &self,
        tpm: &mut SoftTpm,
        session_type: TPM_SE,
        file: &str,
    ) -> Result<PathBuf, Box<dyn Error>> {
        let handle = tpm.start_auth_session(session_type, TPM_ALG_ID::SHA256)?;
        let context = tpm.context_save(handle)?;
        let path = self.workdir.join(file);
        files::save_session_context(&FsStore, &path, &context)?;
        Ok(path)
    }

    fn config(&self, session: &Path, context: &str, auth: Option<&str>) -> Result<PolicySecretConfig, Box<dyn Error>> {
        Ok(PolicySecretConfig {
            policy_session: Some(session.to_path_buf()),
            entity: Some(EntityLocator {
                context_path: context.to_string(),
                auth: AuthSpec::parse(auth)?,
            }),
            ..Default::default()
        })
    }

    /// Sample: compute the policy digest of PolicySecret(endorsement)
    fn trial_policy(&self) -> Result<(), Box<dyn Error>> {
        self.announce("Trial policy digest");

        let mut tpm = SoftTpm::new();
        let session = self.start_session(&mut tpm, TPM_SE::TRIAL, "trial.ctx")?;
        let mut config = self.config(&session, "e", None)?;
        config.policy_digest_out = Some(self.workdir.join("policy.digest"));

        let mut ctx = TpmContext::new(tpm, FsStore);
        let outcome = tpm2_policysecret::execute(&mut ctx, &FsStore, &config)?;
        println!("Policy digest: {}", hex::encode(&outcome.policy_digest));
        Ok(())
    }

    /// Sample: satisfy the policy with the owner password and keep a ticket
    fn owner_ticket(&self) -> Result<(), Box<dyn Error>> {
        self.announce("Owner authorization with ticket");

        let mut tpm = SoftTpm::new().with_hierarchy_auth(TPM_RH::OWNER, b"ownerpw");
        let session = self.start_session(&mut tpm, TPM_SE::POLICY, "policy.ctx")?;
        let mut config = self.config(&session, "o", Some("str:ownerpw"))?;
        config.expiration = -600;
        config.ticket_out = Some(self.workdir.join("ticket.bin"));
        config.timeout_out = Some(self.workdir.join("timeout.bin"));

        let mut ctx = TpmContext::new(tpm, FsStore);
        let outcome = tpm2_policysecret::execute(&mut ctx, &FsStore, &config)?;
        println!("Policy digest: {}", hex::encode(&outcome.policy_digest));

        let ticket = files::load_authorization_ticket(&FsStore, &self.workdir.join("ticket.bin"))?;
        println!("Ticket hierarchy: 0x{:08X}", ticket.hierarchy);
        println!("Ticket digest: {}", hex::encode(&ticket.digest));
        println!(
            "Timeout: {}",
            hex::encode(fs::read(self.workdir.join("timeout.bin"))?)
        );
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let samples = PolicySecretSamples::new()?;
    samples.run_all_samples()?;
    Ok(())
}
