use crate::error::{Error, Result};

use serde::Serialize;
use tera::{Context, Tera};

/// Node bootstrap script. The grammar is fixed; only the enumerated
/// variables below are substituted.
const JOIN_SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
set -eu

curl --retry 100 --retry-delay 0 --connect-timeout 10 --max-time 300 --tlsv1.2 \
    -o /tmp/orbit {{ binary_url }}
chmod +x /tmp/orbit

ORBIT_SERVICE_USER={{ service_uid }}
ORBIT_SERVICE_GROUP={{ service_gid }}
export ORBIT_SERVICE_USER ORBIT_SERVICE_GROUP

/tmp/orbit join {{ ops_url }} \
    --token={{ token }} \
    --advertise-addr={{ advertise_addr }} \
    --server-addr={{ server_addr }} \
    --role={{ role }} \
    --cloud-provider={{ cloud_provider }} \
    {% if selinux %}--selinux{% else %}--no-selinux{% endif %} \
    --operation-id={{ operation_id }}
"#;

#[derive(Clone, Debug, Serialize)]
pub struct JoinScriptParams {
    pub binary_url: String,
    pub ops_url: String,
    pub token: String,
    pub advertise_addr: String,
    pub server_addr: String,
    pub role: String,
    pub cloud_provider: String,
    pub selinux: bool,
    pub operation_id: String,
    pub service_uid: u32,
    pub service_gid: u32,
}

pub fn render_join_script(params: &JoinScriptParams) -> Result<String> {
    let context = Context::from_serialize(params)
        .map_err(|e| Error::Template("invalid join script parameters".to_string(), e))?;
    Tera::one_off(JOIN_SCRIPT_TEMPLATE, &context, false)
        .map_err(|e| Error::Template("failed to render join script".to_string(), e))
}
