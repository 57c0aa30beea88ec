use crate::{HostRecord, NmapReport, ParseOutcome, PortRecord, ScanInfo};
use roxmltree::{Document, Node};

/// Everything before this marker (banner lines, XML prolog, DOCTYPE) is dropped.
pub const REPORT_START: &str = "<nmaprun";

fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| n.tag_name().name() == name)
}

fn children<'a, 'i: 'a>(node: Node<'a, 'i>, name: &'a str) -> impl Iterator<Item = Node<'a, 'i>> + 'a {
    node.children().filter(move |n| n.tag_name().name() == name)
}

fn attr(node: Node, name: &str) -> Option<String> {
    node.attribute(name).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Parse the engine's XML report. Never panics on bad input; anything unusable is `Malformed`.
pub fn parse_xml(raw: &str) -> ParseOutcome {
    let Some(start) = raw.find(REPORT_START) else {
        return ParseOutcome::Malformed("no <nmaprun> element in output".to_string());
    };
    let doc = match Document::parse(&raw[start..]) {
        Ok(doc) => doc,
        Err(e) => return ParseOutcome::Malformed(format!("xml: {}", e)),
    };
    let root = doc.root_element();
    if root.tag_name().name() != "nmaprun" {
        return ParseOutcome::Malformed(format!("unexpected root element <{}>", root.tag_name().name()));
    }
    let hosts = children(root, "host").filter_map(parse_host).collect();
    ParseOutcome::Parsed(NmapReport { info: scan_info(root), hosts })
}

fn scan_info(root: Node) -> ScanInfo {
    let mut info = ScanInfo {
        scanner: attr(root, "scanner"),
        args: attr(root, "args"),
        version: attr(root, "version"),
        start: attr(root, "startstr").or_else(|| attr(root, "start")),
        ..ScanInfo::default()
    };
    if let Some(stats) = child(root, "runstats") {
        if let Some(finished) = child(stats, "finished") {
            info.elapsed = attr(finished, "elapsed");
            info.summary = attr(finished, "summary");
            info.exit = attr(finished, "exit");
        }
        if let Some(hosts) = child(stats, "hosts") {
            let count = |name: &str| -> Option<u32> { attr(hosts, name).and_then(|v| v.parse().ok()) };
            info.hosts_up = count("up");
            info.hosts_down = count("down");
            info.hosts_total = count("total");
        }
    }
    info
}

fn address(host: Node, kind: &str) -> Option<String> {
    children(host, "address")
        .find(|a| a.attribute("addrtype") == Some(kind))
        .and_then(|a| attr(a, "addr"))
}

fn parse_host(host: Node) -> Option<HostRecord> {
    // No IP, no record. MAC-only entries fall out here too.
    let ip = address(host, "ipv4").or_else(|| address(host, "ipv6"))?;
    let hostname = child(host, "hostnames")
        .and_then(|h| child(h, "hostname"))
        .and_then(|h| attr(h, "name"));
    let state = child(host, "status").and_then(|s| attr(s, "state"));
    // First match in document order; accuracy is not compared.
    let os_guess = child(host, "os")
        .and_then(|os| child(os, "osmatch"))
        .and_then(|m| attr(m, "name"));
    let ports = child(host, "ports")
        .map(|ports| children(ports, "port").filter_map(parse_port).collect())
        .unwrap_or_default();
    Some(HostRecord { ip, hostname, state, os_guess, ports })
}

fn parse_port(port: Node) -> Option<PortRecord> {
    let number = attr(port, "portid")?;
    let protocol = attr(port, "protocol").unwrap_or_else(|| "tcp".to_string());
    let state = child(port, "state").and_then(|s| attr(s, "state")).unwrap_or_default();
    let service = child(port, "service");
    Some(PortRecord {
        port: number,
        protocol,
        state,
        service: service.and_then(|s| attr(s, "name")),
        product: service.and_then(|s| attr(s, "product")),
        version: service.and_then(|s| attr(s, "version")),
    })
}
