// Integration tests for the legacy port-forwarding clients.

use secrecy::SecretString;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use routerkit_api::{
    Error, Protocol, RouterId, RouterProfile, RouterType, TransportConfig, get_router_client,
};

fn profile_for(server: &MockServer, router_type: RouterType, model: &str) -> RouterProfile {
    let addr = server.address();
    let mut profile = RouterProfile::new(RouterId(11), router_type, addr.ip())
        .with_web_port(addr.port())
        .with_credentials("admin", SecretString::from("admin".to_owned()));
    profile.model = model.to_owned();
    profile
}

// ── Huawei ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_huawei_ont_model_uses_portforward_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/router/portforward"))
        .and(body_string_contains("<LeaseDuration>0</LeaseDuration>"))
        .and(body_string_contains("<Protocol>TCP/UDP</Protocol>"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let profile = profile_for(&server, RouterType::Huawei, "HG8245H");
    let mut client = get_router_client(&profile, &TransportConfig::default()).unwrap();
    client
        .add_port_forwarding(10020, "192.168.100.9".parse().unwrap(), 8080, Protocol::Both, "camera")
        .await
        .unwrap();
    assert!(client.is_logged_in());
}

#[tokio::test]
async fn test_huawei_falls_back_to_xml_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .and(body_string_contains("<Username>admin</Username>"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/nat/portmapping"))
        .and(body_string_contains("<PortMappingDescription>web</PortMappingDescription>"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let profile = profile_for(&server, RouterType::Huawei, "EG8145V5");
    let mut client = get_router_client(&profile, &TransportConfig::default()).unwrap();
    client
        .add_port_forwarding(10021, "192.168.100.10".parse().unwrap(), 80, Protocol::Tcp, "web")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_huawei_remove_posts_matching_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/nat/portmapping"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<response>\
             <PortMappingInstance><PortMappingIndex>2</PortMappingIndex><ExternalPort>10022</ExternalPort>\
             <PortMappingProtocol>UDP</PortMappingProtocol></PortMappingInstance>\
             <PortMappingInstance><PortMappingIndex>5</PortMappingIndex><ExternalPort>10022</ExternalPort>\
             <PortMappingProtocol>TCP</PortMappingProtocol></PortMappingInstance>\
             </response>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/nat/portmapping"))
        .and(body_string_contains("<PortMappingIndex>5</PortMappingIndex>"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let profile = profile_for(&server, RouterType::Huawei, "");
    let mut client = get_router_client(&profile, &TransportConfig::default()).unwrap();
    client.remove_port_forwarding(10022, Protocol::Tcp).await.unwrap();

    let err = client.remove_port_forwarding(10099, Protocol::Tcp).await.unwrap_err();
    assert!(err.is_not_found());
}

// ── Tenda ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tenda_both_adds_two_virtual_servers() {
    let server = MockServer::start().await;
    // md5("admin"), upper-case hex
    Mock::given(method("POST"))
        .and(path("/login/Auth"))
        .and(body_string_contains("password=21232F297A57A5A743894A0E4A801FC3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/goform/virtualSer"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<table class="rule"><tr><th>#</th></tr>
               <tr><td>1</td><td>8080</td><td>TCP</td><td>192.168.0.5</td><td>80</td></tr></table>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/goform/setVirtualSer"))
        .and(body_string_contains("virtualSer=add"))
        .and(body_string_contains("vIndex=2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let profile = profile_for(&server, RouterType::Tenda, "AC6");
    let mut client = get_router_client(&profile, &TransportConfig::default()).unwrap();
    client
        .add_port_forwarding(10023, "192.168.0.30".parse().unwrap(), 554, Protocol::Both, "dvr")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_tenda_refused_login_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/Auth"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let profile = profile_for(&server, RouterType::Tenda, "AC6");
    let mut client = get_router_client(&profile, &TransportConfig::default()).unwrap();
    let err = client.remove_port_forwarding(10024, Protocol::Tcp).await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
}
