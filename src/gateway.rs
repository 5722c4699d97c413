/*!
 # Typed command layer for the Tradfri gateway

 Groups, devices and moods live under fixed CoAP roots and are encoded as
 JSON objects whose keys are numeric attribute ids. This module wraps those
 payloads in typed values and implements the lookups the mood automation
 needs: resolve by name (exact match, first hit in listing order wins) and
 activate a mood on a group.

 Nothing here is cached; every lookup is a fresh round trip to the gateway.
*/

use serde::{Deserialize, Deserializer};
use serde_json::json;
use tracing::{debug, info, instrument, trace};

use crate::{Error, Result};

/// CoAP root for individual devices
const ROOT_DEVICES: &str = "15001";
/// CoAP root for groups
const ROOT_GROUPS: &str = "15004";
/// CoAP root for moods, scoped by group id
const ROOT_MOODS: &str = "15005";

/// CoAP method of a gateway request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Fetch a resource
    Get,
    /// Update a resource
    Put,
    /// Create a resource
    Post,
}

/// A single blocking request/response exchange with the gateway.
///
/// [`Session`](crate::Session) is the real implementation; tests substitute
/// a scripted fake.
pub trait Api {
    /// Execute one request and return the response payload.
    fn request(&mut self, method: Method, path: &str, payload: Option<Vec<u8>>) -> Result<Vec<u8>>;
}

fn bool_from_int<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let value = u8::deserialize(deserializer)?;
    Ok(value != 0)
}

/// A named collection of devices that can be controlled together
#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    /// Numeric group id
    #[serde(rename = "9003")]
    pub id: u32,
    /// Human-readable name; not guaranteed unique
    #[serde(rename = "9001")]
    pub name: String,
    /// Group-level on/off flag. The gateway reports this as always on, so
    /// the automation reads one designated member's light state instead.
    #[serde(rename = "5850", default, deserialize_with = "bool_from_int")]
    pub is_on: bool,
    #[serde(rename = "9018", default)]
    members: MemberLinks,
}

impl Group {
    /// Ids of the devices linked into this group, in gateway order
    pub fn member_ids(&self) -> &[u32] {
        &self.members.accessories.ids
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MemberLinks {
    #[serde(rename = "15002", default)]
    accessories: IdList,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IdList {
    #[serde(rename = "9003", default)]
    ids: Vec<u32>,
}

/// A device paired with the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    /// Numeric device id
    #[serde(rename = "9003")]
    pub id: u32,
    /// Human-readable name; not guaranteed unique
    #[serde(rename = "9001")]
    pub name: String,
    /// Light controls, empty for non-light devices (remotes, sensors)
    #[serde(rename = "3311", default)]
    pub lights: Vec<Light>,
}

impl Device {
    /// Boolean on/off state of the first light control, if any.
    ///
    /// Only the first light is consulted, even on multi-light fixtures.
    pub fn light_state(&self) -> Option<bool> {
        self.lights.first().map(|light| light.on)
    }
}

/// State of one light control on a device
#[derive(Debug, Clone, Deserialize)]
pub struct Light {
    /// Whether the light is on
    #[serde(rename = "5850", default, deserialize_with = "bool_from_int")]
    pub on: bool,
    /// Dim level (0-254), if the light reports one
    #[serde(rename = "5851", default)]
    pub dimmer: Option<u8>,
}

/// A named light-setting preset that can be activated on its group
#[derive(Debug, Clone, Deserialize)]
pub struct Mood {
    /// Numeric mood id
    #[serde(rename = "9003")]
    pub id: u32,
    /// Human-readable name; not guaranteed unique
    #[serde(rename = "9001")]
    pub name: String,
}

/// Typed commands against a connected gateway session
pub struct Gateway<A> {
    api: A,
}

impl<A: Api> Gateway<A> {
    /// Wraps a request session in the typed command layer
    pub fn new(api: A) -> Gateway<A> {
        Gateway { api }
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&mut self, path: &str) -> Result<T> {
        let payload = self.api.request(Method::Get, path, None)?;
        trace!("GET {} -> {} bytes", path, payload.len());
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Lists the ids of all groups known to the gateway
    pub fn group_ids(&mut self) -> Result<Vec<u32>> {
        self.get_json(ROOT_GROUPS)
    }

    /// Fetches one group by id
    pub fn group(&mut self, id: u32) -> Result<Group> {
        self.get_json(&format!("{ROOT_GROUPS}/{id}"))
    }

    /// Fetches every group known to the gateway, in listing order
    pub fn groups(&mut self) -> Result<Vec<Group>> {
        self.group_ids()?
            .into_iter()
            .map(|id| self.group(id))
            .collect()
    }

    /// Fetches one device by id
    pub fn device(&mut self, id: u32) -> Result<Device> {
        self.get_json(&format!("{ROOT_DEVICES}/{id}"))
    }

    /// Lists the ids of the moods available for a group
    pub fn mood_ids(&mut self, group: &Group) -> Result<Vec<u32>> {
        self.get_json(&format!("{ROOT_MOODS}/{}", group.id))
    }

    /// Fetches one of a group's moods by id
    pub fn mood(&mut self, group: &Group, id: u32) -> Result<Mood> {
        self.get_json(&format!("{ROOT_MOODS}/{}/{id}", group.id))
    }

    /// Fetches every mood available for a group, in listing order
    pub fn moods(&mut self, group: &Group) -> Result<Vec<Mood>> {
        self.mood_ids(group)?
            .into_iter()
            .map(|id| self.mood(group, id))
            .collect()
    }

    /// Resolves a group by name.
    ///
    /// Groups are fetched in listing order and the first exact name match
    /// wins; remaining groups are not fetched.
    #[instrument(skip(self))]
    pub fn group_by_name(&mut self, name: &str) -> Result<Group> {
        for id in self.group_ids()? {
            let group = self.group(id)?;
            trace!("Group {} is named '{}'", group.id, group.name);
            if group.name == name {
                debug!("Group '{}' resolved to id {}", name, group.id);
                return Ok(group);
            }
        }
        Err(Error::GroupNotFound(name.to_string()))
    }

    /// Resolves a device among a group's members by name, first match wins
    #[instrument(skip(self, group), fields(group = %group.name))]
    pub fn member_by_name(&mut self, group: &Group, name: &str) -> Result<Device> {
        for &id in group.member_ids() {
            let device = self.device(id)?;
            trace!("Member {} is named '{}'", device.id, device.name);
            if device.name == name {
                debug!("Member '{}' resolved to id {}", name, device.id);
                return Ok(device);
            }
        }
        Err(Error::MemberNotFound(name.to_string(), group.name.clone()))
    }

    /// Resolves one of a group's moods by name, first match wins
    #[instrument(skip(self, group), fields(group = %group.name))]
    pub fn mood_by_name(&mut self, group: &Group, name: &str) -> Result<Mood> {
        for id in self.mood_ids(group)? {
            let mood = self.mood(group, id)?;
            trace!("Mood {} is named '{}'", mood.id, mood.name);
            if mood.name == name {
                debug!("Mood '{}' resolved to id {}", name, mood.id);
                return Ok(mood);
            }
        }
        Err(Error::MoodNotFound(name.to_string(), group.name.clone()))
    }

    /// Activates a mood on a group by id
    #[instrument(skip(self, group), fields(group = %group.name))]
    pub fn activate_mood(&mut self, group: &Group, mood_id: u32) -> Result<()> {
        let payload = serde_json::to_vec(&json!({ "9039": mood_id, "5850": 1 }))?;
        self.api
            .request(Method::Put, &format!("{ROOT_GROUPS}/{}", group.id), Some(payload))?;
        Ok(())
    }

    /// Runs the whole mood automation: resolve the group by name, read the
    /// designated member's light state, and activate `mood_on` if that
    /// light is on, `mood_off` otherwise. Returns the activated mood.
    pub fn change_mood(
        &mut self,
        group_name: &str,
        member_name: &str,
        mood_on: &str,
        mood_off: &str,
    ) -> Result<Mood> {
        let group = self.group_by_name(group_name)?;
        info!("Using group '{}' (id {})", group.name, group.id);

        let member = self.member_by_name(&group, member_name)?;
        let state = member
            .light_state()
            .ok_or_else(|| Error::NotALight(member.name.clone()))?;
        info!(
            "Member '{}' is {}",
            member.name,
            if state { "on" } else { "off" }
        );

        let mood_name = if state { mood_on } else { mood_off };
        let mood = self.mood_by_name(&group, mood_name)?;

        self.activate_mood(&group, mood.id)?;
        info!("Activated mood '{}' on group '{}'", mood.name, group.name);
        Ok(mood)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Serves canned payloads by path and records every request.
    #[derive(Default)]
    struct FakeApi {
        responses: HashMap<String, Vec<u8>>,
        requests: Vec<(Method, String, Option<Vec<u8>>)>,
    }

    impl FakeApi {
        fn with(mut self, path: &str, body: &str) -> FakeApi {
            self.responses.insert(path.to_string(), body.as_bytes().to_vec());
            self
        }
    }

    impl Api for FakeApi {
        fn request(
            &mut self,
            method: Method,
            path: &str,
            payload: Option<Vec<u8>>,
        ) -> Result<Vec<u8>> {
            self.requests.push((method, path.to_string(), payload));
            self.responses.get(path).cloned().ok_or_else(|| Error::ErrorResponse {
                code: "NotFound".to_string(),
                path: path.to_string(),
            })
        }
    }

    /// A gateway with one group "bathroom" containing a bulb named "light"
    /// and a remote, plus two moods.
    fn bathroom_fixture(light_on: u8) -> FakeApi {
        FakeApi::default()
            .with("15004", "[131073]")
            .with(
                "15004/131073",
                r#"{"9001":"bathroom","9003":131073,"5850":1,"9039":196608,
                    "9018":{"15002":{"9003":[65536,65537]}}}"#,
            )
            .with(
                "15001/65536",
                r#"{"9001":"remote","9003":65536,"5750":0}"#,
            )
            .with(
                "15001/65537",
                &format!(
                    r#"{{"9001":"light","9003":65537,"5750":2,
                        "3311":[{{"5850":{light_on},"5851":254,"9003":0}}]}}"#
                ),
            )
            .with("15005/131073", "[196608,196609]")
            .with(
                "15005/131073/196608",
                r#"{"9001":"FOCUS","9003":196608,"9057":2}"#,
            )
            .with(
                "15005/131073/196609",
                r#"{"9001":"FOCUS OFF","9003":196609,"9057":2}"#,
            )
    }

    fn activation_payload(api: &FakeApi) -> serde_json::Value {
        let (_, path, payload) = api
            .requests
            .iter()
            .find(|(method, _, _)| *method == Method::Put)
            .expect("no PUT issued");
        assert_eq!(path, "15004/131073");
        serde_json::from_slice(payload.as_deref().expect("PUT without payload")).unwrap()
    }

    #[test]
    fn decodes_group_with_member_links() {
        let group: Group = serde_json::from_str(
            r#"{"9001":"bathroom","9003":131073,"5850":1,
                "9018":{"15002":{"9003":[65536,65537]}}}"#,
        )
        .unwrap();
        assert_eq!(group.id, 131073);
        assert_eq!(group.name, "bathroom");
        assert!(group.is_on);
        assert_eq!(group.member_ids(), &[65536, 65537]);
    }

    #[test]
    fn decodes_device_light_state() {
        let device: Device = serde_json::from_str(
            r#"{"9001":"light","9003":65537,"3311":[{"5850":1,"5851":128}]}"#,
        )
        .unwrap();
        assert_eq!(device.light_state(), Some(true));
        assert_eq!(device.lights[0].dimmer, Some(128));
    }

    #[test]
    fn non_light_device_has_no_state() {
        let device: Device =
            serde_json::from_str(r#"{"9001":"remote","9003":65536}"#).unwrap();
        assert_eq!(device.light_state(), None);
    }

    #[test]
    fn group_lookup_takes_first_match_in_listing_order() {
        // Two groups share a name; only the first listed one must be used,
        // and the second must not even be fetched.
        let api = FakeApi::default()
            .with("15004", "[131073,131074]")
            .with("15004/131073", r#"{"9001":"bathroom","9003":131073}"#)
            .with("15004/131074", r#"{"9001":"bathroom","9003":131074}"#);
        let mut gateway = Gateway::new(api);

        let group = gateway.group_by_name("bathroom").unwrap();
        assert_eq!(group.id, 131073);
        let fetched: Vec<_> = gateway.api.requests.iter().map(|(_, p, _)| p.as_str()).collect();
        assert_eq!(fetched, vec!["15004", "15004/131073"]);
    }

    #[test]
    fn missing_group_fails_the_lookup() {
        let api = FakeApi::default()
            .with("15004", "[131073]")
            .with("15004/131073", r#"{"9001":"kitchen","9003":131073}"#);
        let mut gateway = Gateway::new(api);

        let err = gateway.group_by_name("bathroom").unwrap_err();
        assert!(matches!(err, Error::GroupNotFound(name) if name == "bathroom"));
    }

    #[test]
    fn missing_member_fails_the_lookup() {
        let mut gateway = Gateway::new(bathroom_fixture(1));
        let group = gateway.group_by_name("bathroom").unwrap();

        let err = gateway.member_by_name(&group, "no such bulb").unwrap_err();
        assert!(matches!(err, Error::MemberNotFound(name, _) if name == "no such bulb"));
    }

    #[test]
    fn bulb_on_activates_the_on_mood() {
        let mut gateway = Gateway::new(bathroom_fixture(1));
        let mood = gateway
            .change_mood("bathroom", "light", "FOCUS", "FOCUS OFF")
            .unwrap();
        assert_eq!(mood.name, "FOCUS");

        let payload = activation_payload(&gateway.api);
        assert_eq!(payload["9039"], 196608);
        assert_eq!(payload["5850"], 1);
    }

    #[test]
    fn bulb_off_activates_the_off_mood() {
        let mut gateway = Gateway::new(bathroom_fixture(0));
        let mood = gateway
            .change_mood("bathroom", "light", "FOCUS", "FOCUS OFF")
            .unwrap();
        assert_eq!(mood.name, "FOCUS OFF");

        let payload = activation_payload(&gateway.api);
        assert_eq!(payload["9039"], 196609);
    }

    #[test]
    fn non_light_state_member_is_an_error() {
        let mut gateway = Gateway::new(bathroom_fixture(1));
        let err = gateway
            .change_mood("bathroom", "remote", "FOCUS", "FOCUS OFF")
            .unwrap_err();
        assert!(matches!(err, Error::NotALight(name) if name == "remote"));
        // The run failed before anything was activated.
        assert!(gateway.api.requests.iter().all(|(method, _, _)| *method == Method::Get));
    }

    #[test]
    fn missing_mood_aborts_before_activation() {
        let mut gateway = Gateway::new(bathroom_fixture(1));
        let err = gateway
            .change_mood("bathroom", "light", "RELAX", "FOCUS OFF")
            .unwrap_err();
        assert!(matches!(err, Error::MoodNotFound(name, _) if name == "RELAX"));
        assert!(gateway.api.requests.iter().all(|(method, _, _)| *method == Method::Get));
    }
}
